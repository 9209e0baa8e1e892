//! Prints the CRD manifests as JSON, ready for `kubectl apply -f -`.

use crds::Test;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(&Test::crd())?);
    Ok(())
}
