//! P2PKH 風格的帳本位址

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// 主網位址的版本位元組
pub const ADDRESS_VERSION: u8 = 0x00;

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(Sha256::digest(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// 交易簽章公鑰的雜湊，寫入憑證的 tx-signing key hash 欄位
pub fn key_hash(public_key: &[u8]) -> Vec<u8> {
    Sha256::digest(public_key).to_vec()
}

/// 從公鑰推導位址: base58check(version || hash160(pubkey))
/// # 參數
/// * `public_key`: 公鑰位元組 (通常為 SPKI DER 或未壓縮的 EC 點)
/// # 回傳
/// * `String`: base58 編碼的位址
pub fn derive_address(public_key: &[u8]) -> String {
    bs58::encode(hash160(public_key)).with_check_version(ADDRESS_VERSION).into_string()
}

/// 位址會被當成檔名使用，只接受 ASCII 英數字
pub fn is_safe_address(address: &str) -> bool {
    !address.is_empty() && address.len() <= 64 && address.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(address: &str) -> Result<Vec<u8>, bs58::decode::Error> {
        bs58::decode(address).with_check(Some(ADDRESS_VERSION)).into_vec()
    }

    #[test]
    fn derived_address_passes_checksum() {
        let addr = derive_address(b"some public key");
        assert!(addr.starts_with('1'));
        let raw = decode(&addr).unwrap();
        assert_eq!(raw[0], ADDRESS_VERSION);
        assert_eq!(&raw[1..21], &hash160(b"some public key"));
        assert!(is_safe_address(&addr));
        assert_eq!(addr, derive_address(b"some public key"));
        assert_ne!(addr, derive_address(b"another public key"));
    }

    #[test]
    fn tampered_address_fails_checksum() {
        let addr = derive_address(b"k");
        let mut chars: Vec<char> = addr.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();
        assert!(decode(&tampered).is_err());
        assert!(decode("0OIl").is_err());
    }

    #[test]
    fn unsafe_addresses() {
        assert!(!is_safe_address(""));
        assert!(!is_safe_address("../etc/passwd"));
        assert!(!is_safe_address("a b"));
        assert!(is_safe_address("Node01"));
    }
}
