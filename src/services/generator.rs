//! Deterministic authentication code derivation.

use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One derived code paired with its serial number, ready for insertion.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedCode {
    pub serial_number: String,
    pub authentication_code: String,
}

/// Derives authentication codes from batch identity and a server-side
/// secret. Without the secret, valid-looking codes cannot be forged from
/// observed ones.
#[derive(Clone)]
pub struct CodeGenerator {
    secret: Secret<String>,
}

impl CodeGenerator {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// 32 uppercase hex characters: the first half of
    /// SHA-256("{manufacturer}:{batch}:{serial}:{secret}").
    pub fn generate(&self, manufacturer_id: &str, batch_id: &str, serial_number: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}:{}:{}:{}",
                manufacturer_id,
                batch_id,
                serial_number,
                self.secret.expose_secret()
            )
            .as_bytes(),
        );
        let digest = hasher.finalize();
        hex::encode(digest)[..32].to_uppercase()
    }

    /// Serial numbers are batch-scoped and zero-padded so they sort.
    pub fn serial_number(batch_id: &str, index: u32) -> String {
        format!("{}-{:06}", batch_id, index)
    }

    /// Derive `count` codes for a batch, serials starting at `start_index`.
    pub fn generate_for_batch(
        &self,
        manufacturer_id: &str,
        batch_id: &str,
        start_index: u32,
        count: u32,
    ) -> Vec<GeneratedCode> {
        (0..count)
            .map(|i| {
                let serial = Self::serial_number(batch_id, start_index + i);
                let code = self.generate(manufacturer_id, batch_id, &serial);
                GeneratedCode {
                    serial_number: serial,
                    authentication_code: code,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> CodeGenerator {
        CodeGenerator::new(Secret::new("test-secret".to_string()))
    }

    #[test]
    fn same_inputs_same_code() {
        let gen = generator();
        let a = gen.generate("MFR-001", "BATCH-2025-001", "BATCH-2025-001-000001");
        let b = gen.generate("MFR-001", "BATCH-2025-001", "BATCH-2025-001-000001");
        assert_eq!(a, b);
    }

    #[test]
    fn code_is_32_uppercase_hex() {
        let gen = generator();
        let code = gen.generate("MFR-001", "BATCH-2025-001", "BATCH-2025-001-000001");
        assert_eq!(code.len(), 32);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn different_serials_different_codes() {
        let gen = generator();
        let a = gen.generate("MFR-001", "BATCH-2025-001", "BATCH-2025-001-000001");
        let b = gen.generate("MFR-001", "BATCH-2025-001", "BATCH-2025-001-000002");
        assert_ne!(a, b);
    }

    #[test]
    fn different_secret_different_codes() {
        let a = generator().generate("MFR-001", "B1", "B1-000001");
        let b = CodeGenerator::new(Secret::new("other-secret".to_string()))
            .generate("MFR-001", "B1", "B1-000001");
        assert_ne!(a, b);
    }

    #[test]
    fn serial_numbers_are_zero_padded() {
        assert_eq!(
            CodeGenerator::serial_number("BATCH-2025-001", 7),
            "BATCH-2025-001-000007"
        );
    }

    #[test]
    fn batch_generation_is_sequential() {
        let gen = generator();
        let codes = gen.generate_for_batch("MFR-001", "B1", 1, 3);
        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0].serial_number, "B1-000001");
        assert_eq!(codes[2].serial_number, "B1-000003");
        assert_ne!(codes[0].authentication_code, codes[1].authentication_code);
    }
}
