//! CA 金鑰的來源

use std::fmt::Debug;

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey, EcPoint},
    hash::MessageDigest,
    nid::Nid,
    pkcs5::pbkdf2_hmac,
    pkey::{PKey, Private},
    sha::sha256,
};
use serde::{Deserialize, Serialize};

use crate::error::CaError;

/// CA 根憑證固定使用的衍生路徑
pub const CA_KEY_PATH: &str = "m/ca/0";

const SEED_ITERATIONS: usize = 2048;

/// 由路徑衍生出確定性的金鑰對
pub trait KeyProvider: Send + Sync + Debug {
    fn derive_key_pair(&self, path: &str) -> Result<PKey<Private>, CaError>;
}

/// 由助記詞與密碼衍生 P-256 金鑰
///
/// 種子: PBKDF2-HMAC-SHA512(助記詞, "mnemonic" || 密碼, 2048)。
/// 私鑰: SHA-256(種子 || 路徑 || 計數器) 對曲線階數取模，結果為零時遞增計數器
pub struct MnemonicKeyProvider {
    seed: [u8; 64],
}

impl Debug for MnemonicKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnemonicKeyProvider").finish_non_exhaustive()
    }
}

impl MnemonicKeyProvider {
    pub fn new(mnemonic: &str, password: &str) -> Result<Self, CaError> {
        let words: Vec<&str> = mnemonic.split_whitespace().collect();
        if words.is_empty() {
            return Err(CaError::malformed("助記詞不得為空"));
        }
        let salt = format!("mnemonic{password}");
        let mut seed = [0u8; 64];
        pbkdf2_hmac(
            words.join(" ").as_bytes(),
            salt.as_bytes(),
            SEED_ITERATIONS,
            MessageDigest::sha512(),
            &mut seed,
        )?;
        Ok(Self { seed })
    }
}

impl KeyProvider for MnemonicKeyProvider {
    fn derive_key_pair(&self, path: &str) -> Result<PKey<Private>, CaError> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let mut ctx = BigNumContext::new()?;
        let mut order = BigNum::new()?;
        group.order(&mut order, &mut ctx)?;

        let mut counter: u32 = 0;
        let scalar = loop {
            let mut material = Vec::with_capacity(self.seed.len() + path.len() + 4);
            material.extend_from_slice(&self.seed);
            material.extend_from_slice(path.as_bytes());
            material.extend_from_slice(&counter.to_be_bytes());
            let raw = BigNum::from_slice(&sha256(&material))?;
            let mut scalar = BigNum::new()?;
            scalar.nnmod(&raw, &order, &mut ctx)?;
            if scalar.num_bits() > 0 {
                break scalar;
            }
            counter += 1;
        };

        let mut public = EcPoint::new(&group)?;
        public.mul_generator2(&group, &scalar, &mut ctx)?;
        let ec = EcKey::from_private_components(&group, &scalar, &public)?;
        ec.check_key()?;
        Ok(PKey::from_ec_key(ec)?)
    }
}

/// 建立根憑證時使用的網路參數
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkParams {
    /// 網路名稱，作為根憑證的 CN
    pub network_name: String,
    #[serde(default)]
    pub country:      String,
    #[serde(default)]
    pub organization: String,
}

impl NetworkParams {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self { network_name: network_name.into(), country: String::new(), organization: String::new() }
    }
}
