//! Systematic Reed-Solomon codec over GF(2^8).
//!
//! A codec instance is fixed to one `(msg_len, ecc_len)` geometry; the
//! modem constructs a fresh instance whenever the payload length changes.
//! Decoding runs the classic chain: syndromes, Forney syndromes for known
//! erasures, Berlekamp-Massey for the error locator, Chien search for the
//! error positions and Forney's formula for the magnitudes.

use crate::error::{ModemError, Result};
use crate::{gf, poly};

pub struct ReedSolomon {
    msg_len: usize,
    ecc_len: usize,
    generator: Vec<u8>,
}

impl ReedSolomon {
    /// Codec for `msg_len` message bytes protected by `ecc_len` parity
    /// bytes. Up to `ecc_len / 2` unknown byte errors are correctable.
    pub fn new(msg_len: usize, ecc_len: usize) -> Result<Self> {
        if msg_len + ecc_len >= 256 {
            return Err(ModemError::CodewordOverflow { msg_len, ecc_len });
        }
        if msg_len == 0 || ecc_len == 0 {
            return Err(ModemError::InvalidConfig(
                "message and parity lengths must be nonzero".to_string(),
            ));
        }

        // g(x) = prod_{i=0}^{ecc_len-1} (x - 2^i)
        let mut generator = vec![1u8];
        for i in 0..ecc_len {
            generator = poly::mul(&generator, &[1, gf::pow(2, i as i32)]);
        }

        Ok(Self {
            msg_len,
            ecc_len,
            generator,
        })
    }

    pub fn msg_len(&self) -> usize {
        self.msg_len
    }

    pub fn ecc_len(&self) -> usize {
        self.ecc_len
    }

    pub fn codeword_len(&self) -> usize {
        self.msg_len + self.ecc_len
    }

    /// Systematic encode: output is `[message][parity]`.
    pub fn encode(&self, msg: &[u8]) -> Result<Vec<u8>> {
        if msg.len() != self.msg_len {
            return Err(ModemError::InvalidInputSize);
        }

        // Synthetic division by the generator; the tail of the work
        // buffer ends up holding the parity bytes.
        let mut work = vec![0u8; self.codeword_len()];
        work[..self.msg_len].copy_from_slice(msg);
        for i in 0..self.msg_len {
            let coef = work[i];
            if coef == 0 {
                continue;
            }
            for (j, &g) in self.generator.iter().enumerate().skip(1) {
                work[i + j] ^= gf::mul(g, coef);
            }
        }

        let mut out = Vec::with_capacity(self.codeword_len());
        out.extend_from_slice(msg);
        out.extend_from_slice(&work[self.msg_len..]);
        Ok(out)
    }

    /// Decode a `[message][parity]` buffer, correcting unknown errors and
    /// the erasures whose codeword positions are listed in `erasures`.
    /// Returns the corrected message bytes.
    pub fn decode(&self, codeword: &[u8], erasures: &[usize]) -> Result<Vec<u8>> {
        let total = self.codeword_len();
        if codeword.len() != total || erasures.iter().any(|&p| p >= total) {
            return Err(ModemError::InvalidInputSize);
        }
        if erasures.len() > self.ecc_len {
            return Err(ModemError::TooManyErrors(self.ecc_len));
        }

        let mut msg = codeword.to_vec();
        for &pos in erasures {
            msg[pos] = 0;
        }

        let synd = self.syndromes(&msg);
        if synd.iter().all(|&s| s == 0) {
            msg.truncate(self.msg_len);
            return Ok(msg);
        }

        let forney = forney_syndromes(&synd, erasures, total);
        let err_loc = self.find_error_locator(&forney, erasures.len())?;

        let err_pos = if err_loc.len() > 1 {
            let reversed: Vec<u8> = err_loc.iter().rev().copied().collect();
            find_errors(&reversed, total)?
        } else {
            Vec::new()
        };
        if err_pos.is_empty() && erasures.is_empty() {
            return Err(ModemError::DecodeFailed);
        }

        let mut errata: Vec<usize> = erasures.to_vec();
        errata.extend_from_slice(&err_pos);

        correct_errata(&synd, &errata, &mut msg)?;
        msg.truncate(self.msg_len);
        Ok(msg)
    }

    /// Syndrome polynomial, padded with a leading zero so that
    /// `synd[i]` is the codeword evaluated at `2^(i-1)`.
    fn syndromes(&self, msg: &[u8]) -> Vec<u8> {
        let mut synd = vec![0u8; self.ecc_len + 1];
        for i in 1..=self.ecc_len {
            synd[i] = poly::eval(msg, gf::pow(2, i as i32 - 1));
        }
        synd
    }

    /// Berlekamp-Massey over the Forney syndromes. `erase_count` known
    /// erasures shorten the search since their locator is folded into the
    /// syndromes already.
    fn find_error_locator(&self, forney: &[u8], erase_count: usize) -> Result<Vec<u8>> {
        let mut err_loc = vec![1u8];
        let mut old_loc = vec![1u8];

        for k in 0..self.ecc_len - erase_count {
            let mut delta = forney[k];
            for j in 1..err_loc.len() {
                delta ^= gf::mul(err_loc[err_loc.len() - 1 - j], forney[k - j]);
            }

            old_loc.push(0);
            if delta != 0 {
                if old_loc.len() > err_loc.len() {
                    let scaled = poly::scale(&old_loc, delta);
                    old_loc = poly::scale(&err_loc, gf::inverse(delta));
                    err_loc = scaled;
                }
                err_loc = poly::add(&err_loc, &poly::scale(&old_loc, delta));
            }
        }

        let shift = match err_loc.iter().position(|&c| c != 0) {
            Some(s) => s,
            None => return Err(ModemError::DecodeFailed),
        };
        let err_loc = err_loc[shift..].to_vec();

        let errs = err_loc.len() as i64 - 1;
        let erasures = erase_count as i64;
        if (errs - erasures) * 2 + erasures > self.ecc_len as i64 {
            return Err(ModemError::TooManyErrors(self.ecc_len));
        }
        Ok(err_loc)
    }
}

/// Remove the known-erasure contribution from the syndromes so that
/// Berlekamp-Massey only sees the unknown errors.
fn forney_syndromes(synd: &[u8], erasures: &[usize], total: usize) -> Vec<u8> {
    let mut fs: Vec<u8> = synd[1..].to_vec();
    for &pos in erasures {
        let x = gf::pow(2, (total - 1 - pos) as i32);
        for j in 0..fs.len() - 1 {
            fs[j] = gf::mul(fs[j], x) ^ fs[j + 1];
        }
    }
    fs
}

/// Chien search: roots of the reversed locator give the error positions.
fn find_errors(reversed_loc: &[u8], total: usize) -> Result<Vec<usize>> {
    let expected = reversed_loc.len() - 1;
    let mut positions = Vec::with_capacity(expected);
    for i in 0..total {
        if poly::eval(reversed_loc, gf::pow(2, i as i32)) == 0 {
            positions.push(total - 1 - i);
        }
    }
    if positions.len() != expected {
        return Err(ModemError::DecodeFailed);
    }
    Ok(positions)
}

/// Forney's formula: compute the error magnitudes at the errata
/// positions and add them into `msg` in place.
fn correct_errata(synd: &[u8], errata_pos: &[usize], msg: &mut [u8]) -> Result<()> {
    let total = msg.len();
    let coef_pos: Vec<usize> = errata_pos.iter().map(|&p| total - 1 - p).collect();

    let mut errata_loc = vec![1u8];
    for &cp in &coef_pos {
        let term = poly::add(&[1], &[gf::pow(2, cp as i32), 0]);
        errata_loc = poly::mul(&errata_loc, &term);
    }

    let rsynd: Vec<u8> = synd.iter().rev().copied().collect();

    // Reversed error evaluator: remainder of (rsynd * errata_loc) / x^(e+1)
    let e_deg = errata_loc.len() - 1;
    let product = poly::mul(&rsynd, &errata_loc);
    let mut divisor = vec![0u8; e_deg + 2];
    divisor[0] = 1;
    let (_, re_eval) = poly::div(&product, &divisor);

    let x: Vec<u8> = coef_pos
        .iter()
        .map(|&cp| gf::pow(2, cp as i32 - 255))
        .collect();

    for i in 0..x.len() {
        let xi_inv = gf::inverse(x[i]);

        let mut loc_prime = 1u8;
        for j in 0..x.len() {
            if j != i {
                loc_prime = gf::mul(loc_prime, gf::sub(1, gf::mul(xi_inv, x[j])));
            }
        }
        if loc_prime == 0 {
            return Err(ModemError::DecodeFailed);
        }

        let y = gf::mul(x[i], poly::eval(&re_eval, xi_inv));
        msg[errata_pos[i]] ^= gf::div(y, loc_prime);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn corrupt(codeword: &mut [u8], count: usize, rng: &mut StdRng) {
        let mut hit = vec![false; codeword.len()];
        let mut done = 0;
        while done < count {
            let pos = rng.gen_range(0..codeword.len());
            if hit[pos] {
                continue;
            }
            hit[pos] = true;
            codeword[pos] ^= rng.gen_range(1..=255u8);
            done += 1;
        }
    }

    #[test]
    fn test_rejects_oversized_codeword() {
        assert!(matches!(
            ReedSolomon::new(224, 32),
            Err(ModemError::CodewordOverflow { .. })
        ));
        assert!(ReedSolomon::new(223, 32).is_ok());
    }

    #[test]
    fn test_encode_layout_is_systematic() {
        let rs = ReedSolomon::new(5, 4).unwrap();
        let msg = b"hello";
        let cw = rs.encode(msg).unwrap();
        assert_eq!(cw.len(), 9);
        assert_eq!(&cw[..5], msg);
    }

    #[test]
    fn test_roundtrip_no_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        for &(msg_len, ecc_len) in &[(1usize, 2usize), (3, 4), (82, 32), (140, 56), (200, 55)] {
            let rs = ReedSolomon::new(msg_len, ecc_len).unwrap();
            let msg: Vec<u8> = (0..msg_len).map(|_| rng.gen()).collect();
            let cw = rs.encode(&msg).unwrap();
            assert_eq!(rs.decode(&cw, &[]).unwrap(), msg);
        }
    }

    #[test]
    fn test_corrects_up_to_half_ecc_errors() {
        let mut rng = StdRng::seed_from_u64(2);
        for &(msg_len, ecc_len) in &[(10usize, 8usize), (82, 32), (50, 16)] {
            let rs = ReedSolomon::new(msg_len, ecc_len).unwrap();
            let msg: Vec<u8> = (0..msg_len).map(|_| rng.gen()).collect();
            let clean = rs.encode(&msg).unwrap();
            for errors in 1..=ecc_len / 2 {
                let mut cw = clean.clone();
                corrupt(&mut cw, errors, &mut rng);
                assert_eq!(rs.decode(&cw, &[]).unwrap(), msg, "errors = {}", errors);
            }
        }
    }

    #[test]
    fn test_beyond_capacity_never_wrong_silently() {
        let mut rng = StdRng::seed_from_u64(3);
        let rs = ReedSolomon::new(40, 16).unwrap();
        let msg: Vec<u8> = (0..40).map(|_| rng.gen()).collect();
        let clean = rs.encode(&msg).unwrap();
        for _ in 0..50 {
            let mut cw = clean.clone();
            corrupt(&mut cw, rs.ecc_len() / 2 + 1, &mut rng);
            match rs.decode(&cw, &[]) {
                Ok(out) => assert_eq!(out, msg),
                Err(e) => assert!(matches!(
                    e,
                    ModemError::DecodeFailed | ModemError::TooManyErrors(_)
                )),
            }
        }
    }

    #[test]
    fn test_erasure_correction() {
        let mut rng = StdRng::seed_from_u64(4);
        let rs = ReedSolomon::new(20, 8).unwrap();
        let msg: Vec<u8> = (0..20).map(|_| rng.gen()).collect();
        let clean = rs.encode(&msg).unwrap();

        // ecc_len erasures at known positions are still correctable
        let mut cw = clean.clone();
        let positions = [0usize, 3, 7, 11, 15, 19, 22, 26];
        for &p in &positions {
            cw[p] ^= 0x5a;
        }
        assert_eq!(rs.decode(&cw, &positions).unwrap(), msg);
    }

    #[test]
    fn test_mixed_errors_and_erasures() {
        let mut rng = StdRng::seed_from_u64(5);
        let rs = ReedSolomon::new(30, 12).unwrap();
        let msg: Vec<u8> = (0..30).map(|_| rng.gen()).collect();
        let mut cw = rs.encode(&msg).unwrap();

        // 4 erasures + 4 unknown errors: 4 + 2*4 = 12 = ecc_len, still ok
        let erasures = [1usize, 5, 9, 13];
        for &p in &erasures {
            cw[p] ^= 0xff;
        }
        for &p in &[20usize, 25, 31, 38] {
            cw[p] ^= 0x11;
        }
        assert_eq!(rs.decode(&cw, &erasures).unwrap(), msg);
    }

    #[test]
    fn test_too_many_erasures_rejected() {
        let rs = ReedSolomon::new(10, 4).unwrap();
        let cw = rs.encode(&[0u8; 10]).unwrap();
        let erasures: Vec<usize> = (0..5).collect();
        assert!(matches!(
            rs.decode(&cw, &erasures),
            Err(ModemError::TooManyErrors(4))
        ));
    }

    #[test]
    fn test_length_codeword_geometry() {
        // The length byte in variable mode travels as a (1, 2) codeword:
        // one corrupted byte out of three must still decode.
        let rs = ReedSolomon::new(1, 2).unwrap();
        let cw = rs.encode(&[117]).unwrap();
        assert_eq!(cw.len(), 3);
        for pos in 0..3 {
            let mut bad = cw.clone();
            bad[pos] ^= 0x42;
            assert_eq!(rs.decode(&bad, &[]).unwrap(), vec![117], "pos = {}", pos);
        }
        // Two corrupted bytes are beyond the codeword's capacity
        let mut bad = cw.clone();
        bad[0] ^= 0x42;
        bad[1] ^= 0x37;
        assert!(rs.decode(&bad, &[]).is_err());
    }
}
