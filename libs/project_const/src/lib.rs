use std::{io, path::PathBuf};

pub struct ProjectConst;
impl ProjectConst {
    pub const SOFTWARE_PORT: u16 = 11210;
    pub const SAVE_DIR: &'static str = "/etc";
    pub const PROJECT_NAME: &'static str = "LCA";
    pub const CERTS_DIR: &'static str = "certs";
    /// 已簽發憑證 DER 檔的子目錄，檔名為區塊鏈地址
    pub const ISSUED_DIR: &'static str = "issued";
    pub const DB_DIR: &'static str = "db";

    pub fn is_debug() -> bool {
        cfg!(debug_assertions)
    }
    /// release 版本的根目錄 (`/etc/LCA`)
    pub fn release_save_dir() -> PathBuf {
        PathBuf::from(Self::SAVE_DIR).join(Self::PROJECT_NAME)
    }
    fn base(sub: &str) -> PathBuf {
        if Self::is_debug() {
            PathBuf::from(sub)
        } else {
            Self::release_save_dir().join(sub)
        }
    }
    pub fn certs_path() -> PathBuf {
        Self::base(Self::CERTS_DIR)
    }
    pub fn db_path() -> PathBuf {
        Self::base(Self::DB_DIR)
    }
    /// 確保目錄存在，不存在時建立
    /// # 參數
    /// * `dir`: 目標目錄
    /// # 回傳
    /// * `io::Result<PathBuf>`: 建立完成的目錄
    pub fn ensure_dir(dir: PathBuf) -> io::Result<PathBuf> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_paths_are_relative() {
        if ProjectConst::is_debug() {
            assert!(ProjectConst::db_path().is_relative());
        } else {
            assert!(ProjectConst::db_path().starts_with(ProjectConst::release_save_dir()));
        }
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let base = std::env::temp_dir().join(format!("lca-const-{}", std::process::id()));
        let nested = base.join("a").join("b");
        let created = ProjectConst::ensure_dir(nested.clone()).unwrap();
        assert!(created.is_dir());
        std::fs::remove_dir_all(base).unwrap();
    }
}
