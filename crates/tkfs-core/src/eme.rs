//! EME (ECB-Mix-ECB): a wide-block tweakable cipher over AES-256 (spec
//! §4.2). Operates on whole multiples of 16 bytes up to 2048 bytes
//! (128 AES blocks), encrypting deterministically given (key, tweak,
//! plaintext) — the Halevi-Rogaway "A Parallelizable Enciphering Mode"
//! construction gocryptfs uses (via `github.com/rfjakob/eme`) to turn a
//! directory IV plus a block cipher into a filename cipher.
//!
//! `original_source/` vendors that package rather than defining it
//! in-tree, so there's no Go source to translate line-for-line here; this
//! follows the published ECB-Mix-ECB algorithm directly, expressed over
//! `aes::Aes256`'s raw block encrypt/decrypt.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::error::{CoreError, Result};

const BLOCK_LEN: usize = 16;
pub const MAX_PLAINTEXT_LEN: usize = 2048;

type Block = [u8; BLOCK_LEN];

/// Doubles a 128-bit value in GF(2^128) under the same reduction
/// polynomial as AES-CMAC (NIST SP 800-38B "dbl"): shift the big-endian
/// bit string left by one, and XOR 0x87 into the last byte if a 1 bit
/// was shifted out.
fn double(block: &mut Block) {
    let mut carry = 0u8;
    for byte in block.iter_mut().rev() {
        let next_carry = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = next_carry;
    }
    if carry == 1 {
        block[BLOCK_LEN - 1] ^= 0x87;
    }
}

fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_LEN];
    for i in 0..BLOCK_LEN {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn aes_encrypt(cipher: &Aes256, block: &Block) -> Block {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    ga.into()
}

fn aes_decrypt(cipher: &Aes256, block: &Block) -> Block {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut ga);
    ga.into()
}

fn to_blocks(data: &[u8]) -> Vec<Block> {
    data.chunks_exact(BLOCK_LEN)
        .map(|c| c.try_into().expect("chunks_exact yields BLOCK_LEN slices"))
        .collect()
}

fn validate_len(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(CoreError::CryptoCorrupt(format!(
            "EME input must be a non-empty multiple of {BLOCK_LEN} bytes, got {}",
            data.len()
        )));
    }
    if data.len() > MAX_PLAINTEXT_LEN {
        return Err(CoreError::NameTooLong(data.len()));
    }
    Ok(())
}

/// Precompute `L, 2L, 4L, ..., 2^(m-1)L` for an `m`-block transform.
fn tabulate_l(cipher: &Aes256, m: usize) -> Vec<Block> {
    let mut l = aes_encrypt(cipher, &[0u8; BLOCK_LEN]);
    let mut table = Vec::with_capacity(m);
    table.push(l);
    for _ in 1..m {
        double(&mut l);
        table.push(l);
    }
    table
}

/// Encrypt `plaintext` (a multiple of 16 bytes, at most 2048) under
/// `key` (32 bytes) with 16-byte tweak `tweak`.
pub fn encrypt(key: &[u8; 32], tweak: &Block, plaintext: &[u8]) -> Result<Vec<u8>> {
    validate_len(plaintext)?;
    let cipher = Aes256::new(key.into());
    let p = to_blocks(plaintext);
    let m = p.len();
    let l_table = tabulate_l(&cipher, m);

    let pp: Vec<Block> = p.iter().zip(&l_table).map(|(pi, li)| aes_encrypt(&cipher, &xor(pi, li))).collect();

    let mp = pp.iter().fold([0u8; BLOCK_LEN], |acc, b| xor(&acc, b));
    let mc = aes_encrypt(&cipher, &xor(&mp, tweak));
    let m_xor = xor(&mp, &mc);

    let mut cc = vec![[0u8; BLOCK_LEN]; m];
    let mut cc_sum = [0u8; BLOCK_LEN];
    for i in 1..m {
        let mi = double_n(&m_xor, i);
        cc[i] = aes_encrypt(&cipher, &xor(&pp[i], &mi));
        cc_sum = xor(&cc_sum, &cc[i]);
    }

    let mut out = Vec::with_capacity(plaintext.len());
    let c1 = xor(&mc, &cc_sum);
    out.extend_from_slice(&c1);
    for i in 1..m {
        out.extend_from_slice(&xor(&cc[i], &l_table[i]));
    }
    Ok(out)
}

/// Decrypt a ciphertext produced by [`encrypt`] under the same key and
/// tweak.
pub fn decrypt(key: &[u8; 32], tweak: &Block, ciphertext: &[u8]) -> Result<Vec<u8>> {
    validate_len(ciphertext)?;
    let cipher = Aes256::new(key.into());
    let c = to_blocks(ciphertext);
    let m = c.len();
    let l_table = tabulate_l(&cipher, m);

    let mut cc = vec![[0u8; BLOCK_LEN]; m];
    for i in 1..m {
        cc[i] = xor(&c[i], &l_table[i]);
    }
    let cc_sum = cc.iter().skip(1).fold([0u8; BLOCK_LEN], |acc, b| xor(&acc, b));
    let mc = xor(&c[0], &cc_sum);

    // MC = AESenc(MP xor T), so MP = AESdec(MC) xor T.
    let mp = xor(&aes_decrypt(&cipher, &mc), tweak);
    let m_xor = xor(&mp, &mc);

    let mut pp = vec![[0u8; BLOCK_LEN]; m];
    for i in 1..m {
        let mi = double_n(&m_xor, i);
        pp[i] = xor(&aes_decrypt(&cipher, &cc[i]), &mi);
    }
    pp[0] = xor(&mp, &pp.iter().skip(1).fold([0u8; BLOCK_LEN], |acc, b| xor(&acc, b)));

    let mut out = Vec::with_capacity(ciphertext.len());
    for i in 0..m {
        out.extend_from_slice(&xor(&aes_decrypt(&cipher, &pp[i]), &l_table[i]));
    }
    Ok(out)
}

/// Apply `double` to `base` exactly `n` times (`2^n * base` in GF(2^128)).
fn double_n(base: &Block, n: usize) -> Block {
    let mut out = *base;
    for _ in 0..n {
        double(&mut out);
    }
    out
}
