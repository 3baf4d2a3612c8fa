use kube::CustomResourceExt;
use std::fs;
use tsdb_types::*;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/tsdb.io_cluster_crd.yaml",
        serde_yaml::to_string(&Cluster::crd()).unwrap(),
    )
    .unwrap();
}
