//! Job instance storage.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use forgebatch_core::{JobInstance, JobInstanceId, JobParameters};

use super::error::StoreError;

/// Job instance store abstraction. Instances are immutable once created.
pub trait JobInstanceStore: Send + Sync {
    /// Fails with [`StoreError::InstanceExists`] if an instance with the same
    /// name and identifying parameters already exists.
    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, StoreError>;

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, StoreError>;

    fn get_job_instance_by_id(&self, id: JobInstanceId) -> Result<Option<JobInstance>, StoreError>;

    /// Distinct job names, sorted.
    fn get_job_names(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory instance store keyed by `(job name, identity key)`.
#[derive(Debug, Default)]
pub struct InMemoryJobInstanceStore {
    instances: RwLock<HashMap<(String, String), JobInstance>>,
    last_id: AtomicU64,
}

impl InMemoryJobInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(job_name: &str, parameters: &JobParameters) -> (String, String) {
    (job_name.to_string(), parameters.to_identity_key())
}

impl JobInstanceStore for InMemoryJobInstanceStore {
    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, StoreError> {
        let key = key(job_name, parameters);
        let mut instances = self.instances.write().map_err(|_| StoreError::Poisoned)?;
        if instances.contains_key(&key) {
            return Err(StoreError::InstanceExists(format!("{job_name} [{}]", key.1)));
        }

        let id = JobInstanceId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
        let instance = JobInstance::new(id, job_name, parameters);
        instances.insert(key, instance.clone());
        Ok(instance)
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, StoreError> {
        let instances = self.instances.read().map_err(|_| StoreError::Poisoned)?;
        Ok(instances.get(&key(job_name, parameters)).cloned())
    }

    fn get_job_instance_by_id(&self, id: JobInstanceId) -> Result<Option<JobInstance>, StoreError> {
        let instances = self.instances.read().map_err(|_| StoreError::Poisoned)?;
        Ok(instances.values().find(|i| i.id() == id).cloned())
    }

    fn get_job_names(&self) -> Result<Vec<String>, StoreError> {
        let instances = self.instances.read().map_err(|_| StoreError::Poisoned)?;
        let names: BTreeSet<&str> = instances.values().map(JobInstance::job_name).collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgebatch_core::ParameterValue;

    #[test]
    fn create_then_lookup_by_identifying_parameters() {
        let store = InMemoryJobInstanceStore::new();
        let params = JobParameters::builder()
            .add_string("file", "a.csv")
            .add_non_identifying("run.note", ParameterValue::String("first".into()))
            .build();

        let created = store.create_job_instance("import", &params).unwrap();
        assert_eq!(created.id(), JobInstanceId::new(1));

        let lookup = JobParameters::builder().add_string("file", "a.csv").build();
        let found = store.get_job_instance("import", &lookup).unwrap().unwrap();
        assert_eq!(found.id(), created.id());
        assert_eq!(store.get_job_instance_by_id(created.id()).unwrap(), Some(created));
        assert!(store.get_job_instance("export", &lookup).unwrap().is_none());
    }

    #[test]
    fn duplicate_instance_is_rejected() {
        let store = InMemoryJobInstanceStore::new();
        store.create_job_instance("foo", &JobParameters::new()).unwrap();

        assert!(matches!(
            store.create_job_instance("foo", &JobParameters::new()),
            Err(StoreError::InstanceExists(_))
        ));
    }

    #[test]
    fn separators_in_values_do_not_alias_instances() {
        let store = InMemoryJobInstanceStore::new();
        let two = JobParameters::builder()
            .add_string("a", "x")
            .add_string("b", "y")
            .build();
        let one = JobParameters::builder().add_string("a", "x;b=string:y").build();

        let first = store.create_job_instance("foo", &two).unwrap();
        let second = store.create_job_instance("foo", &one).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(store.get_job_instance("foo", &one).unwrap(), Some(second));
    }

    #[test]
    fn job_names_are_distinct_and_sorted() {
        let store = InMemoryJobInstanceStore::new();
        store.create_job_instance("b", &JobParameters::new()).unwrap();
        store
            .create_job_instance("a", &JobParameters::builder().add_long("n", 1).build())
            .unwrap();
        store
            .create_job_instance("a", &JobParameters::builder().add_long("n", 2).build())
            .unwrap();

        assert_eq!(store.get_job_names().unwrap(), vec!["a", "b"]);
    }
}
