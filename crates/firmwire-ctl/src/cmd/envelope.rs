//! Envelope commands: sign firmware, inspect a stored envelope.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use firmwire_core::crypto::{self, FirmwareKey};
use firmwire_core::Envelope;

use super::keys::load_signer;

pub fn cmd_sign(key: &Path, firmware: &Path, out: &Path) -> Result<()> {
    let signer = load_signer(key)?;
    let image = std::fs::read(firmware)
        .with_context(|| format!("failed to read firmware: {}", firmware.display()))?;

    let envelope = signer.seal(&image)?;
    std::fs::write(out, &envelope)
        .with_context(|| format!("failed to write envelope: {}", out.display()))?;

    println!(
        "Signed {} bytes of firmware into {} ({} bytes)",
        image.len(),
        out.display(),
        envelope.len()
    );
    println!("SHA-256: {}", hex::encode(crypto::sha256(&image)));
    Ok(())
}

/// What `inspect` reports about an envelope.
#[derive(Debug, Serialize)]
pub struct Report {
    pub envelope_len: usize,
    pub sig_len: usize,
    pub pub_key_len: usize,
    pub fw_len: usize,
    pub public_key: String,
    pub firmware_sha256: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse and verify `buffer` the same way the daemon does.
pub fn inspect(buffer: &[u8]) -> Result<Report> {
    let envelope = Envelope::parse(buffer)?;
    let verdict = crypto::verify(envelope.public_key, envelope.signature, envelope.firmware);

    // show the key normalised when it imports, raw otherwise
    let public_key = FirmwareKey::import(envelope.public_key)
        .map(|k| hex::encode(k.to_bytes()))
        .unwrap_or_else(|_| hex::encode(envelope.public_key));

    Ok(Report {
        envelope_len: buffer.len(),
        sig_len: envelope.signature.len(),
        pub_key_len: envelope.public_key.len(),
        fw_len: envelope.firmware.len(),
        public_key,
        firmware_sha256: hex::encode(crypto::sha256(envelope.firmware)),
        verified: verdict.is_ok(),
        error: verdict.err().map(|e| e.to_string()),
    })
}

pub fn cmd_inspect(path: &Path, json: bool) -> Result<()> {
    let buffer =
        std::fs::read(path).with_context(|| format!("failed to read envelope: {}", path.display()))?;
    let report = inspect(&buffer).with_context(|| format!("{} is not an envelope", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Envelope:    {} bytes", report.envelope_len);
        println!("Signature:   {} bytes", report.sig_len);
        println!("Public key:  {} bytes  {}", report.pub_key_len, report.public_key);
        println!("Firmware:    {} bytes", report.fw_len);
        println!("SHA-256:     {}", report.firmware_sha256);
        match &report.error {
            None => println!("Signature:   valid"),
            Some(e) => println!("Signature:   INVALID ({e})"),
        }
    }

    if !report.verified {
        anyhow::bail!("envelope failed verification");
    }
    Ok(())
}
