use kstate_base::{invalid_argument, Result};
use std::fmt;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const READ = 1;
        const WRITE = 2;
    }
}

impl Permissions {
    /// Validate a raw permissions bitset from a caller: must be non-empty
    /// and contain only the READ/WRITE bits. WRITE-alone is promoted to
    /// WRITE|READ; READ-alone is returned unchanged.
    pub fn from_requested(caller: &str, bits: u32) -> Result<Permissions> {
        if bits == 0 {
            return Err(invalid_argument(format!(
                "{caller}: unset permissions bits (0x0) not allowed"
            )));
        }
        let Some(perms) = Permissions::from_bits(bits) else {
            let unknown = bits & !Permissions::all().bits();
            return Err(invalid_argument(format!(
                "{caller}: unexpected permission bits {unknown:#x} in {bits:#x}"
            )));
        };
        Ok(if perms.contains(Permissions::WRITE) {
            perms | Permissions::READ
        } else {
            perms
        })
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Permissions::READ) {
            parts.push("READ");
        }
        if self.contains(Permissions::WRITE) {
            parts.push("WRITE");
        }
        if parts.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn zero_is_rejected() {
        assert!(Permissions::from_requested("test", 0).is_err());
    }

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(Permissions::from_requested("test", 0b1000).is_err());
    }

    #[test]
    fn write_alone_implies_read() {
        let p = Permissions::from_requested("test", Permissions::WRITE.bits()).unwrap();
        assert!(p.contains(Permissions::READ));
        assert!(p.contains(Permissions::WRITE));
    }

    #[test]
    fn read_alone_stays_read_only() {
        let p = Permissions::from_requested("test", Permissions::READ.bits()).unwrap();
        assert_eq!(p, Permissions::READ);
    }

    #[test]
    fn display_formats_both_bits() {
        assert_eq!((Permissions::READ | Permissions::WRITE).to_string(), "READ|WRITE");
        assert_eq!(Permissions::READ.to_string(), "READ");
    }
}
