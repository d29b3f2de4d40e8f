//! Standalone known-answer-test verifier for the on-disk AD wire format,
//! HKDF subkey derivation, and block AEAD seal used by `tkfs-core`. Takes
//! a KAT JSON file and recomputes each value independently of the library,
//! so a silent drift in either side would be caught by a mismatch here.

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).ok_or_else(|| anyhow::anyhow!("usage: tkfs-kat-verify <file.json>"))?;
    tkfs_kat_verify::verify_file(&path)?;
    println!("KAT OK: {path}");
    Ok(())
}
