/// A caller allowed to use the Service API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    /// Key for verifying the caller's request signatures.
    pub secret: Box<[u8]>,
}

impl ClientConfig {
    pub fn new(name: String, secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            name,
            secret: secret.into(),
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}
