use std::path::Path;

use anyhow::Context;
use pinwire_transport::{DirectDialer, certificate_fingerprint, download_certificate};

pub fn download(address: &str, out: Option<&Path>, dialer: DirectDialer) -> anyhow::Result<()> {
    let pem = download_certificate(address, &dialer)?;
    let fingerprint = certificate_fingerprint(&pem).unwrap_or_else(|| "unavailable".to_string());

    match out {
        Some(path) => {
            std::fs::write(path, &pem)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✓ Saved certificate for {address} to {}", path.display());
            println!("  SHA-256 {fingerprint}");
        }
        None => {
            // Keep stdout pure PEM so it can be redirected.
            print!("{pem}");
            eprintln!("SHA-256 {fingerprint}");
        }
    }
    eprintln!("Verify this fingerprint out of band before pinning it.");
    Ok(())
}
