//! Fixed-width vector math: cosine similarity and the byte codec used to
//! store embedding vectors as SQLite blobs.
//!
//! Vectors are stored little-endian, 4 bytes per `f32`. Similarity search is
//! an exhaustive linear scan over decoded blobs, an accepted trade-off at
//! personal-corpus scale.

use anyhow::{bail, Result};

/// Encode an f32 vector into a little-endian byte blob.
pub fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode a little-endian byte blob back into an f32 vector.
///
/// Fails if the blob length is not a multiple of 4.
pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("vector blob length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0.0 when either vector has zero magnitude. Length mismatch is an
/// error: it means embeddings from incompatible models were mixed.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        bail!("vector length mismatch: {} vs {}", a.len(), b.len());
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (av, bv) in a.iter().zip(b.iter()) {
        let av = *av as f64;
        let bv = *bv as f64;
        dot += av * bv;
        na += av * av;
        nb += bv * bv;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / denom)
}
