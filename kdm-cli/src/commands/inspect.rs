use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use kdm::{DecryptedKDM, EncryptedKDM};

/**
    Print a KDM's public (unencrypted) metadata without needing the recipient's private key.
*/
#[derive(Args)]
pub struct InspectCommand {
    /// Path to a KDM XML file.
    path: PathBuf,

    /// Recipient's PKCS#8 private key. If given, also decrypts and prints the key records.
    #[arg(long)]
    decrypt: Option<PathBuf>,
}

impl InspectCommand {
    pub fn run(self) -> Result<()> {
        let xml = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let kdm = EncryptedKDM::parse(&xml).context("failed to parse KDM")?;
        tracing::info!(path = %self.path.display(), keys = kdm.keys().len(), "parsed KDM");

        println!("Message ID:        {}", kdm.id());
        println!(
            "Annotation:        {}",
            kdm.annotation_text().unwrap_or("(none)")
        );
        println!("Issue date:        {}", kdm.issue_date());
        println!("CPL ID:            {}", kdm.cpl_id());
        println!("Content title:     {}", kdm.content_title_text());
        println!("Not valid before:  {}", kdm.not_valid_before());
        println!("Not valid after:   {}", kdm.not_valid_after());
        println!("Recipient subject: {}", kdm.recipient_x509_subject_name());
        println!("Encrypted keys:    {}", kdm.keys().len());

        match kdm.signer_certificate_chain() {
            Ok(chain) => match chain.leaf() {
                Ok(leaf) => println!("Signer leaf:       {}", leaf.subject()),
                Err(e) => println!("Signer leaf:       (unavailable: {e})"),
            },
            Err(e) => println!("Signer chain:      (unavailable: {e})"),
        }

        if let Some(key_path) = &self.decrypt {
            let key_pem = std::fs::read_to_string(key_path)
                .with_context(|| format!("failed to read {}", key_path.display()))?;
            let decrypted =
                DecryptedKDM::from_encrypted(&kdm, &key_pem).context("failed to decrypt KDM")?;
            tracing::info!(keys = decrypted.keys().len(), "decrypted key records");
            let dump = decrypted.as_xml().context("failed to render decrypted dump")?;
            println!();
            println!("{}", String::from_utf8_lossy(&dump));
        }

        Ok(())
    }
}
