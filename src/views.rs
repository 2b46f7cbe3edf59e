use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, ResponseError};
use kube::api::{Api, ListParams};
use kube::Client;
use serde::Serialize;

use crate::backup::{backup_location, BackupLocation};
use crate::crd::{load_cluster_resource, EtcdCluster, ServiceStatus};
use crate::errors::Error;
use crate::metrics;
use crate::updater::StoreError;

pub struct AppState {
    pub client: Client,
    pub namespace: Option<String>,
    pub default_bucket: String,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Store {
                source: StoreError::NotFound,
                ..
            } => StatusCode::NOT_FOUND,
            Error::KubeError(kube::Error::Api(resp)) if resp.code == 404 => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::PvZeroSize => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Backup view of one cluster.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BackupView {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<BackupLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

impl BackupView {
    pub fn new(cluster: &EtcdCluster, namespace: &str, default_bucket: &str) -> Self {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        // Judged the way the reconciler will see it once defaults are written.
        let policy = cluster.spec.backup.clone().map(|mut policy| {
            policy.apply_defaults();
            policy
        });
        let error = policy.as_ref().and_then(|p| p.validate().err()).map(|err| err.to_string());
        BackupView {
            valid: error.is_none(),
            error,
            location: policy
                .as_ref()
                .and_then(|p| backup_location(p, namespace, name, default_bucket)),
            status: cluster.status.as_ref().and_then(|s| s.backup_service_status.clone()),
        }
    }
}

// Simple health check endpoint
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::new(StatusCode::OK)
}

// List current etcd clusters
pub async fn clusters(data: web::Data<AppState>, _req: HttpRequest) -> Result<web::Json<Vec<EtcdCluster>>, Error> {
    let api: Api<EtcdCluster> = match &data.namespace {
        Some(namespace) => load_cluster_resource(&data.client, namespace),
        None => Api::all(data.client.clone()),
    };
    let list = api.list(&ListParams::default()).await.map_err(|err| {
        metrics::kube_error_happened("list_clusters", &err);
        err
    })?;
    Ok(web::Json(list.items))
}

// Backup policy check, artifact location and totals of one cluster
pub async fn cluster_backup(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<web::Json<BackupView>, Error> {
    let (namespace, name) = path.into_inner();
    let api = load_cluster_resource(&data.client, &namespace);
    let cluster = api.get(&name).await.map_err(|err| {
        metrics::kube_error_happened("get_cluster", &err);
        err
    })?;
    Ok(web::Json(BackupView::new(&cluster, &namespace, &data.default_bucket)))
}
