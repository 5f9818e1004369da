//! List the model types known to the registry.
//!
//! gammafit models [--name PowerLaw]

use anyhow::Result;
use clap::Args;

use gammafit_core::ModelRegistry;

#[derive(Args)]
pub struct ModelsArgs {
    /// Only describe this model type
    #[arg(long)]
    name: Option<String>,
}

pub fn run(args: ModelsArgs) -> Result<()> {
    let registry = ModelRegistry::with_builtin();
    match args.name {
        Some(name) => {
            let model = registry.create(&name)?;
            println!("{}", model.type_name());
            for par in model.parameters() {
                println!("  {}", par);
            }
        }
        None => print!("{}", registry),
    }
    Ok(())
}
