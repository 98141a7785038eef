use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kdm_core::CertificateChain;

/**
    Generate a fresh three-tier signing chain (root, intermediate, leaf) and
    write each certificate plus the leaf's private key to `output_dir`.
*/
#[derive(Args)]
pub struct CreateChainCommand {
    /// Directory to write root.pem, intermediate.pem, leaf.pem and leaf.key into.
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Organisation name (`O`) shared by every certificate in the chain.
    #[arg(long, default_value = "Example Studio")]
    organisation: String,

    /// Organisational unit (`OU`) shared by every certificate in the chain.
    #[arg(long, default_value = "Key Delivery")]
    organisational_unit: String,

    #[arg(long, default_value = "Example Studio Root CA")]
    root_common_name: String,

    #[arg(long, default_value = "Example Studio Intermediate CA")]
    intermediate_common_name: String,

    #[arg(long, default_value = "Example Leaf Decryption")]
    leaf_common_name: String,
}

impl CreateChainCommand {
    pub fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).context("failed to create output directory")?;

        let chain = CertificateChain::generate_new(
            &self.organisation,
            &self.organisational_unit,
            &self.root_common_name,
            &self.intermediate_common_name,
            &self.leaf_common_name,
        )
        .context("failed to generate certificate chain")?;

        let ordered = chain.root_to_leaf().context("generated chain did not validate")?;
        tracing::info!(
            root = %self.root_common_name,
            leaf = %self.leaf_common_name,
            "generated certificate chain"
        );
        let names = ["root", "intermediate", "leaf"];
        for (cert, name) in ordered.iter().zip(names) {
            let path = self.output_dir.join(format!("{name}.pem"));
            std::fs::write(&path, cert.to_pem(true))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }

        let key_path = self.output_dir.join("leaf.key");
        let key_pem = chain
            .private_key_pem()
            .context("generated chain has no private key")?;
        std::fs::write(&key_path, key_pem)
            .with_context(|| format!("failed to write {}", key_path.display()))?;
        println!("wrote {}", key_path.display());

        Ok(())
    }
}
