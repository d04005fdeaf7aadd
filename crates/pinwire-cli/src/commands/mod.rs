pub mod cert;
pub mod check;
