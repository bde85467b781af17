use arcade_types::UserId;
use std::sync::RwLock;

const DEVICE_USER: &str = "device";

/// Supplies the user whose ledger is being read or written.
pub trait Identity {
    fn current_user(&self) -> Option<UserId>;
}

/// Single-owner identity for on-device ledgers; always authenticated.
#[derive(Clone, Debug)]
pub struct DeviceIdentity(UserId);

impl DeviceIdentity {
    pub fn new(user: impl Into<UserId>) -> Self {
        Self(user.into())
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(DEVICE_USER)
    }
}

impl Identity for DeviceIdentity {
    fn current_user(&self) -> Option<UserId> {
        Some(self.0.clone())
    }
}

/// Signed-in user of a remote ledger. Empty until [`SessionIdentity::sign_in`].
#[derive(Debug, Default)]
pub struct SessionIdentity {
    user: RwLock<Option<UserId>>,
}

impl SessionIdentity {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(Some(user.into())),
        }
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        let mut guard = self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(user.into());
    }

    pub fn sign_out(&self) {
        let mut guard = self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }
}

impl Identity for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_identity_is_always_present() {
        assert_eq!(
            DeviceIdentity::default().current_user(),
            Some(UserId::from(DEVICE_USER))
        );
    }

    #[test]
    fn test_session_identity_sign_in_and_out() {
        let session = SessionIdentity::default();
        assert_eq!(session.current_user(), None);
        session.sign_in("alice");
        assert_eq!(session.current_user(), Some(UserId::from("alice")));
        session.sign_out();
        assert_eq!(session.current_user(), None);
    }

    #[test]
    fn test_session_identity_signed_in_at_start() {
        let session = SessionIdentity::signed_in("bob");
        assert_eq!(session.current_user(), Some(UserId::from("bob")));
    }
}
