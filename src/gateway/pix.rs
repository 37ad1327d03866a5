//! PIX key format rules

use uuid::Uuid;

use crate::domain::{DomainError, PixKeyType};

/// Check a PIX key against the format of its type and return the value to
/// store. RANDOM keys without a value get a generated one.
pub fn normalize_pix_key(key_type: PixKeyType, key: Option<&str>) -> Result<String, DomainError> {
    let key = key.map(str::trim).filter(|k| !k.is_empty());

    match (key_type, key) {
        (PixKeyType::Random, None) => Ok(Uuid::new_v4().to_string()),
        (_, None) => Err(DomainError::InvalidPixKey(format!(
            "a {} key requires a value",
            key_type
        ))),
        (PixKeyType::Cpf, Some(key)) => {
            if key.len() == 11 && key.chars().all(|c| c.is_ascii_digit()) {
                Ok(key.to_string())
            } else {
                Err(DomainError::InvalidPixKey("CPF must have 11 digits".into()))
            }
        }
        (PixKeyType::Email, Some(key)) => match key.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(key.to_lowercase())
            }
            _ => Err(DomainError::InvalidPixKey(format!("invalid e-mail: {}", key))),
        },
        (PixKeyType::Phone, Some(key)) => {
            let digits = key.strip_prefix('+').unwrap_or("");
            if (10..=14).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
                Ok(key.to_string())
            } else {
                Err(DomainError::InvalidPixKey(
                    "phone must be + followed by 10 to 14 digits".into(),
                ))
            }
        }
        (PixKeyType::Random, Some(key)) => Uuid::parse_str(key)
            .map(|uuid| uuid.to_string())
            .map_err(|_| DomainError::InvalidPixKey(format!("random key is not a UUID: {}", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpf() {
        assert_eq!(
            normalize_pix_key(PixKeyType::Cpf, Some("12345678901")).unwrap(),
            "12345678901"
        );
        assert!(normalize_pix_key(PixKeyType::Cpf, Some("123.456.789-01")).is_err());
        assert!(normalize_pix_key(PixKeyType::Cpf, Some("1234567890")).is_err());
    }

    #[test]
    fn test_email() {
        assert_eq!(
            normalize_pix_key(PixKeyType::Email, Some(" Ana@Bank.com ")).unwrap(),
            "ana@bank.com"
        );
        assert!(normalize_pix_key(PixKeyType::Email, Some("@bank.com")).is_err());
        assert!(normalize_pix_key(PixKeyType::Email, Some("ana@")).is_err());
        assert!(normalize_pix_key(PixKeyType::Email, Some("a@b@c")).is_err());
    }

    #[test]
    fn test_phone() {
        assert!(normalize_pix_key(PixKeyType::Phone, Some("+5511987654321")).is_ok());
        assert!(normalize_pix_key(PixKeyType::Phone, Some("5511987654321")).is_err());
        assert!(normalize_pix_key(PixKeyType::Phone, Some("+55119")).is_err());
    }

    #[test]
    fn test_random() {
        let generated = normalize_pix_key(PixKeyType::Random, None).unwrap();
        assert!(Uuid::parse_str(&generated).is_ok());

        let given = Uuid::new_v4().to_string();
        assert_eq!(
            normalize_pix_key(PixKeyType::Random, Some(&given)).unwrap(),
            given
        );
        assert!(normalize_pix_key(PixKeyType::Random, Some("not-a-uuid")).is_err());
    }

    #[test]
    fn test_missing_value() {
        assert!(matches!(
            normalize_pix_key(PixKeyType::Email, None),
            Err(DomainError::InvalidPixKey(_))
        ));
        assert!(normalize_pix_key(PixKeyType::Cpf, Some("   ")).is_err());
    }
}
