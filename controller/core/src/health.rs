/// A component whose health is reported on the probe endpoints.
pub trait Probes: Send + Sync {
    fn liveness(&self) -> bool;

    fn readiness(&self) -> bool;

    /// Names the component in probe diagnostics.
    fn id(&self) -> String;
}
