#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod envoy;
pub mod gateway;
pub mod labels;
pub mod networking;

pub use k8s_openapi::{
    api::{self, apps::v1::Deployment},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client, Error,
};
