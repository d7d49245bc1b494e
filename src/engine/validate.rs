use crate::limits::*;

use super::EngineError;

pub fn require_id(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(format!("{field} is required")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(EngineError::invalid(format!(
            "{field} exceeds {MAX_ID_LEN} bytes"
        )));
    }
    Ok(())
}

pub fn require_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::invalid(format!("{field} exceeds {max} bytes")));
    }
    Ok(())
}

pub fn require_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 || party_size > MAX_PARTY_SIZE {
        return Err(EngineError::invalid(format!(
            "party size must be between 1 and {MAX_PARTY_SIZE}"
        )));
    }
    Ok(())
}

/// One `@`, something on each side.
pub fn require_email(value: &str) -> Result<(), EngineError> {
    require_text("customer email", value, MAX_CONTACT_LEN)?;
    let mut parts = value.trim().split('@');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    );
    if !well_formed {
        return Err(EngineError::invalid(format!("invalid email: {value}")));
    }
    Ok(())
}

/// Returns the trimmed key.
pub fn require_idempotency_key(key: &str) -> Result<&str, EngineError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(EngineError::invalid("idempotency key is required"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(EngineError::invalid(format!(
            "idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    Ok(key)
}

pub fn optional_notes(notes: Option<&str>) -> Result<(), EngineError> {
    match notes {
        Some(n) if n.len() > MAX_NOTES_LEN => Err(EngineError::invalid(format!(
            "notes exceed {MAX_NOTES_LEN} bytes"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(require_email("ana@example.com").is_ok());
        assert!(require_email("ana").is_err());
        assert!(require_email("@example.com").is_err());
        assert!(require_email("ana@").is_err());
        assert!(require_email("a@b@c").is_err());
        assert!(require_email("   ").is_err());
    }

    #[test]
    fn party_sizes() {
        assert!(require_party_size(0).is_err());
        assert!(require_party_size(1).is_ok());
        assert!(require_party_size(MAX_PARTY_SIZE).is_ok());
        assert!(require_party_size(MAX_PARTY_SIZE + 1).is_err());
    }

    #[test]
    fn keys_are_trimmed_and_bounded() {
        assert_eq!(require_idempotency_key("  abc \n").unwrap(), "abc");
        assert!(require_idempotency_key(" \t").is_err());
        assert!(require_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn notes_are_optional_but_bounded() {
        assert!(optional_notes(None).is_ok());
        assert!(optional_notes(Some("")).is_ok());
        assert!(optional_notes(Some(&"x".repeat(MAX_NOTES_LEN + 1))).is_err());
    }
}
