pub mod dag;

pub use dag::{build_dag, build_dag_tiers};
