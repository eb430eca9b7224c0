//! Server status transition table.

use crate::models::ServerStatus;

/// Whether the event stream may move a server from `from` to `to`.
///
/// `suspended` is always reachable. An unknown current status accepts any
/// first observation. Staying in the same status is not a transition and is
/// reported as illegal here; callers treat it as a no-op before asking.
pub fn is_legal(from: ServerStatus, to: ServerStatus) -> bool {
    use ServerStatus::*;
    if to == Suspended {
        return from != Suspended;
    }
    if to == Unknown {
        return false;
    }
    match from {
        Unknown => true,
        Offline => matches!(to, Starting | Installing),
        Starting => matches!(to, Running | Offline),
        Running => matches!(to, Stopping),
        Stopping => matches!(to, Offline),
        Installing => matches!(to, Offline | InstallFailed),
        InstallFailed | ReinstallFailed => matches!(to, Installing | Offline),
        RestoringBackup => matches!(to, Offline | Running),
        Suspended => matches!(to, Offline),
    }
}

/// Every status reachable from `from` in one legal step.
pub fn allowed_from(from: ServerStatus) -> Vec<ServerStatus> {
    ServerStatus::ALL
        .iter()
        .copied()
        .filter(|to| is_legal(from, *to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServerStatus::*;

    #[test]
    fn test_table_rows() {
        assert_eq!(allowed_from(Offline), vec![Starting, Installing, Suspended]);
        assert_eq!(allowed_from(Starting), vec![Offline, Running, Suspended]);
        assert_eq!(allowed_from(Running), vec![Stopping, Suspended]);
        assert_eq!(allowed_from(Stopping), vec![Offline, Suspended]);
        assert_eq!(allowed_from(Suspended), vec![Offline]);
        assert_eq!(allowed_from(RestoringBackup), vec![Offline, Running, Suspended]);
    }

    #[test]
    fn test_install_rows() {
        assert!(is_legal(Installing, Offline));
        assert!(is_legal(Installing, InstallFailed));
        assert!(!is_legal(Installing, ReinstallFailed));
        assert_eq!(allowed_from(Installing), vec![Offline, InstallFailed, Suspended]);
        assert!(is_legal(InstallFailed, Installing));
        assert!(is_legal(ReinstallFailed, Installing));
        assert!(is_legal(ReinstallFailed, Offline));
        assert!(!is_legal(InstallFailed, Running));
    }

    #[test]
    fn test_suspension_always_legal() {
        for from in ServerStatus::ALL {
            if from != Suspended {
                assert!(is_legal(from, Suspended), "{} -> suspended", from);
            }
        }
    }

    #[test]
    fn test_illegal_examples() {
        assert!(!is_legal(Running, Offline));
        assert!(!is_legal(Running, Starting));
        assert!(!is_legal(Offline, Running));
        assert!(!is_legal(Stopping, Running));
        assert!(!is_legal(Running, Running));
    }

    #[test]
    fn test_unknown() {
        for to in ServerStatus::ALL {
            if to != Unknown {
                assert!(is_legal(Unknown, to));
            }
            assert!(!is_legal(to, Unknown));
        }
    }
}
