//! Prints the Distribution CRD as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/distribution.yaml`

use anyhow::Result;

fn main() -> Result<()> {
    let yaml = serde_yaml::to_string(&crds::distribution_crd())?;
    print!("{yaml}");
    Ok(())
}
