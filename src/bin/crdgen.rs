//! # CRD Generator
//!
//! Prints the `Scope` and `TenantStatus` CustomResourceDefinitions as one
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use fleet_controller::crd::{Scope, TenantStatus};
use kube::core::CustomResourceExt;

fn main() {
    for crd in [Scope::crd(), TenantStatus::crd()] {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{}", yaml);
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {}", e);
                std::process::exit(1);
            }
        }
    }
}
