//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every served kind as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/ocm-controller.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

fn main() {
    match ocm_controller::crd::render_crds() {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRDs to YAML: {e}");
            std::process::exit(1);
        }
    }
}
