//! Features command - list what can go into a build

use crate::cli::args::{FeaturesArgs, OutputFormat};
use crate::config::Config;
use crate::error::BuildsrvResult;
use crate::features::{Feature, FeatureRegistry};
use console::style;

/// Execute the features command
pub async fn execute(args: FeaturesArgs, config: &Config) -> BuildsrvResult<()> {
    let registry = FeatureRegistry::from_entries(&config.features)?;
    let features = select(&registry, args.all);

    match args.format {
        OutputFormat::Table => print_table(&features),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&features)?),
        OutputFormat::Plain => {
            for feature in &features {
                println!("{}", feature.name);
            }
        }
    }

    Ok(())
}

fn select(registry: &FeatureRegistry, all: bool) -> Vec<&Feature> {
    if all {
        registry.iter().collect()
    } else {
        registry.addons()
    }
}

fn print_table(features: &[&Feature]) {
    if features.is_empty() {
        println!("{}", style("No add-on features configured").dim());
        return;
    }

    println!(
        "{:<16} {:<40} {}",
        style("NAME").bold(),
        style("PACKAGE").bold(),
        style("DESCRIPTION").bold()
    );
    println!("{}", "-".repeat(80));

    for feature in features {
        let name = if feature.required {
            style(feature.name.as_str()).yellow()
        } else {
            style(feature.name.as_str())
        };
        let package = if feature.package.is_empty() {
            "(built-in)"
        } else {
            feature.package.as_str()
        };
        println!("{:<16} {:<40} {}", name, package, feature.description);
    }

    println!();
    println!("{} feature(s)", features.len());
}
