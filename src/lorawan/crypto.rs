//! LoRaWAN session-key cryptography: AES-128-CMAC frame MICs and the
//! AES-128 counter-block FRMPayload cipher.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;

use super::{AesKey, DevAddr};

/// Frame direction, as encoded in the B0/A blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn to_byte(self) -> u8 {
        match self {
            Direction::Up => 0x00,
            Direction::Down => 0x01,
        }
    }
}

/// Compute the 4-byte MIC of a data frame.
///
/// `msg` is the frame without its MIC (MHDR | MACPayload); `fcnt` is the
/// full 32-bit counter, not the 16 on-air bits.
pub fn data_frame_mic(
    key: &AesKey,
    dir: Direction,
    dev_addr: DevAddr,
    fcnt: u32,
    msg: &[u8],
) -> [u8; 4] {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    b0[5] = dir.to_byte();
    let mut addr = dev_addr.0;
    addr.reverse();
    b0[6..10].copy_from_slice(&addr);
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b0[15] = msg.len() as u8;

    let mut mac =
        <Cmac<Aes128> as Mac>::new_from_slice(&key.0).expect("AES-128 key length is fixed");
    mac.update(&b0);
    mac.update(msg);
    let tag = mac.finalize().into_bytes();

    let mut mic = [0u8; 4];
    mic.copy_from_slice(&tag[..4]);
    mic
}

/// Constant-time MIC comparison.
pub fn mic_eq(a: &[u8; 4], b: &[u8; 4]) -> bool {
    a.ct_eq(b).into()
}

/// Encrypt or decrypt an FRMPayload in place (the XOR stream is its own
/// inverse). Key selection is the caller's concern: NwkSKey for FPort 0,
/// AppSKey otherwise.
pub fn encrypt_frm_payload(
    key: &AesKey,
    dir: Direction,
    dev_addr: DevAddr,
    fcnt: u32,
    payload: &mut [u8],
) {
    let cipher = Aes128::new_from_slice(&key.0).expect("AES-128 key length is fixed");
    let mut addr = dev_addr.0;
    addr.reverse();

    for (i, chunk) in payload.chunks_mut(16).enumerate() {
        let mut block = [0u8; 16];
        block[0] = 0x01;
        block[5] = dir.to_byte();
        block[6..10].copy_from_slice(&addr);
        block[10..14].copy_from_slice(&fcnt.to_le_bytes());
        block[15] = (i + 1) as u8;

        let mut s = aes::Block::from(block);
        cipher.encrypt_block(&mut s);
        for (b, k) in chunk.iter_mut().zip(s.iter()) {
            *b ^= k;
        }
    }
}

/// See [`encrypt_frm_payload`].
pub fn decrypt_frm_payload(
    key: &AesKey,
    dir: Direction,
    dev_addr: DevAddr,
    fcnt: u32,
    payload: &mut [u8],
) {
    encrypt_frm_payload(key, dir, dev_addr, fcnt, payload);
}
