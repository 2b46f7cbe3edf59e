use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use lazy_static::lazy_static;

pub const METRICS_NAMESPACE: &str = "etcd_controller";

lazy_static! {
    pub static ref KUBE_ERRORS: IntCounterVec = IntCounterVec::new(
      Opts::new("kube_errors", "etcd-controller k8s related errors")
      .namespace(METRICS_NAMESPACE),
      &["action", "kube_name"]
    ).unwrap();
    pub static ref UPDATE_CONFLICTS: IntCounter = IntCounter::with_opts(
      Opts::new("update_conflicts", "etcd-controller writes rejected because of a stale resourceVersion")
      .namespace(METRICS_NAMESPACE)
    ).unwrap();
    pub static ref UPDATE_RESULTS: IntCounterVec = IntCounterVec::new(
      Opts::new("update_results", "etcd-controller optimistic update outcomes")
      .namespace(METRICS_NAMESPACE),
      &["result"]
    ).unwrap();
    pub static ref DELETION_WAITS: IntCounterVec = IntCounterVec::new(
      Opts::new("deletion_waits", "etcd-controller cluster deletion confirmation outcomes")
      .namespace(METRICS_NAMESPACE),
      &["result"]
    ).unwrap();
    pub static ref VALIDATION_FAILURES: IntCounter = IntCounter::with_opts(
      Opts::new("validation_failures", "etcd-controller rejected backup policies")
      .namespace(METRICS_NAMESPACE)
    ).unwrap();
}

pub fn custom_metrics(registry: &Registry) -> prometheus::Result<()> {
  registry.register(Box::new(KUBE_ERRORS.clone()))?;
  registry.register(Box::new(UPDATE_CONFLICTS.clone()))?;
  registry.register(Box::new(UPDATE_RESULTS.clone()))?;
  registry.register(Box::new(DELETION_WAITS.clone()))?;
  registry.register(Box::new(VALIDATION_FAILURES.clone()))?;
  Ok(())
}

pub fn kube_error_name(err: &kube::Error) -> &'static str {
  match err {
    kube::Error::Api(_) => "api",
    kube::Error::HyperError(_) => "hyper_error",
    kube::Error::Service(_) => "service_error",
    kube::Error::SerdeError(_) => "serde_error",
    kube::Error::HttpError(_) => "http_error",
    _ => "other",
  }
}

pub fn kube_error_happened(action: &str, err: &kube::Error) {
  KUBE_ERRORS.with_label_values(&[action, kube_error_name(err)]).inc();
}

pub fn update_conflict() {
  UPDATE_CONFLICTS.inc();
}

pub fn update_finished(result: &str) {
  UPDATE_RESULTS.with_label_values(&[result]).inc();
}

pub fn deletion_wait_finished(result: &str) {
  DELETION_WAITS.with_label_values(&[result]).inc();
}

pub fn validation_failed() {
  VALIDATION_FAILURES.inc();
}
