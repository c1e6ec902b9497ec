use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{distr::Alphanumeric, Rng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("密碼雜湊失敗: {0}")]
    Hash(String),
    #[error("儲存的雜湊格式錯誤: {0}")]
    Malformed(String),
}

/// 以 Argon2id 雜湊密碼，結果再以 base64 包裝後儲存
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(general_purpose::STANDARD.encode(password_hash.as_bytes()))
}

/// 驗證密碼，密碼不符時回傳 `Ok(false)`，只有雜湊本身毀損才回傳錯誤
pub fn verify_password(password: &str, encoded_hash: &str) -> Result<bool, PasswordError> {
    let decoded = general_purpose::STANDARD
        .decode(encoded_hash)
        .map_err(|e| PasswordError::Malformed(e.to_string()))?;
    let decoded = String::from_utf8(decoded).map_err(|e| PasswordError::Malformed(e.to_string()))?;
    let parsed = PasswordHash::new(&decoded).map_err(|e| PasswordError::Malformed(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Malformed(e.to_string())),
    }
}

/// 產生隨機英數字密碼，用於初始管理者帳號
pub fn generate_password(len: usize) -> String {
    rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}
