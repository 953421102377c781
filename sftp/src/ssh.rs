//! SSH client handler with an optional server-key allow-list.

use russh::client::Handler;
use tracing::debug;

pub(crate) struct SshClient {
    /// OpenSSH SHA256 fingerprints or raw base64 public keys. `None`
    /// accepts any server key.
    pub allowed_fingerprints: Option<Vec<String>>,
}

impl Handler for SshClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        use russh::keys::PublicKeyBase64;

        let fingerprint = server_public_key
            .fingerprint(russh::keys::HashAlg::Sha256)
            .to_string();
        debug!("server key fingerprint: {fingerprint}");

        match &self.allowed_fingerprints {
            Some(allowed) => {
                let key_b64 = server_public_key.public_key_base64();
                Ok(allowed.iter().any(|s| s == &fingerprint || s == &key_b64))
            }
            None => Ok(true),
        }
    }
}
