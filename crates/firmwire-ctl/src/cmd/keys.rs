//! Signing key commands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use firmwire_core::crypto::FirmwareSigner;

pub fn cmd_keygen(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to replace it", out.display());
    }

    let signer = FirmwareSigner::generate();
    write_secret(out, &*signer.secret_bytes())?;

    println!("Secret key:  {}", out.display());
    println!("Public key:  {}", hex::encode(signer.public_key().to_bytes()));
    Ok(())
}

/// Load a signer from a raw 32-byte secret key file.
pub fn load_signer(path: &Path) -> Result<FirmwareSigner> {
    let bytes = Zeroizing::new(
        std::fs::read(path).with_context(|| format!("failed to read key: {}", path.display()))?,
    );
    FirmwareSigner::from_secret(&bytes)
        .with_context(|| format!("invalid signing key: {}", path.display()))
}

fn write_secret(path: &Path, secret: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create key file: {}", path.display()))?;
    file.write_all(secret)
        .with_context(|| format!("failed to write key file: {}", path.display()))?;
    Ok(())
}
