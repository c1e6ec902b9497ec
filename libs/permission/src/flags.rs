use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// CA 帳號對 CA 自身 API 的存取權限
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        const CREATE_ACCOUNTS     = 1 << 0;
        const DELETE_ACCOUNTS     = 1 << 1;
        const APPROVE_ACCOUNTS    = 1 << 2;
        const CHANGE_ACCESS_LEVEL = 1 << 3;
        const CHANGE_PASSWORDS    = 1 << 4;
        const READ_ACCOUNTS       = 1 << 5;
        const ISSUE_CERTIFICATES  = 1 << 6;
        const REVOKE_CERTIFICATES = 1 << 7;
        const READ_CERTIFICATES   = 1 << 8;
        const INITIALIZE_CA       = 1 << 9;
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        AccessFlags::empty()
    }
}

impl AccessFlags {
    /// 建立者只能授予自己擁有的權限
    pub fn can_grant(self, requested: AccessFlags) -> bool {
        self.contains(requested)
    }

    /// 資料庫中的數值；未定義的位元會被丟棄
    pub fn from_stored(bits: i64) -> Self {
        AccessFlags::from_bits_truncate(bits as u32)
    }
}

/// 帳號權限檢查：`flags` 必須包含 `required` 的每一個位元
pub fn has_account_permission(flags: AccessFlags, required: AccessFlags) -> bool {
    flags.contains(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_requires_every_bit() {
        let flags = AccessFlags::ISSUE_CERTIFICATES | AccessFlags::READ_CERTIFICATES;
        assert!(has_account_permission(flags, AccessFlags::ISSUE_CERTIFICATES));
        assert!(has_account_permission(flags, AccessFlags::empty()));
        assert!(!has_account_permission(
            flags,
            AccessFlags::ISSUE_CERTIFICATES | AccessFlags::REVOKE_CERTIFICATES
        ));
    }

    #[test]
    fn cannot_grant_what_you_do_not_hold() {
        let creator = AccessFlags::CREATE_ACCOUNTS | AccessFlags::ISSUE_CERTIFICATES;
        assert!(creator.can_grant(AccessFlags::ISSUE_CERTIFICATES));
        assert!(!creator.can_grant(AccessFlags::REVOKE_CERTIFICATES));
        assert!(AccessFlags::all().can_grant(AccessFlags::all()));
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let stored = (AccessFlags::READ_ACCOUNTS.bits() | (1 << 30)) as i64;
        assert_eq!(AccessFlags::from_stored(stored), AccessFlags::READ_ACCOUNTS);
    }
}
