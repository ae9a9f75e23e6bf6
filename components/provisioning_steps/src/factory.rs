use crate::step::Step;
use crate::steps::{
    BaseDbPreVmSetup, ConfigCompute, CreateStorage, CreateUser, CreateVm, ExascaleComplete,
    GoldImageBackup, InstallCluster, PostGiInstall, PostVmInstall, PreVmChecks, PreVmSetup,
};
use provisioning_primitives::{steps, ProvisioningError, Result, StepName};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

pub type StepConstructor = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactoryKind {
    Asm,
    Exascale,
    BaseDb,
    Custom(&'static str),
}

/// Step name to constructor mapping for one deployment family.
pub struct StepFactory {
    kind: FactoryKind,
    constructors: HashMap<String, StepConstructor>,
}

fn boxed<S: Step + Default + 'static>() -> StepConstructor {
    Arc::new(|| Box::new(S::default()) as Box<dyn Step>)
}

static ASM: LazyLock<StepFactory> = LazyLock::new(|| {
    StepFactory::new(FactoryKind::Asm)
        .register(steps::PREVM_CHECKS, boxed::<PreVmChecks>())
        .register(steps::PREVM_SETUP, boxed::<PreVmSetup>())
        .register(steps::CREATE_VM, boxed::<CreateVm>())
        .register(steps::CREATE_USER, boxed::<CreateUser>())
        .register(steps::CREATE_STORAGE, boxed::<CreateStorage>())
        .register(steps::POSTVM_INSTALL, boxed::<PostVmInstall>())
        .register(steps::INSTALL_CLUSTER, boxed::<InstallCluster>())
        .register(steps::POSTGI_INSTALL, boxed::<PostGiInstall>())
        .register(steps::BACKUPVM_GOLDIMAGE, boxed::<GoldImageBackup>())
});

static EXASCALE: LazyLock<StepFactory> = LazyLock::new(|| {
    StepFactory::new(FactoryKind::Exascale)
        .register(steps::PREVM_CHECKS, boxed::<PreVmChecks>())
        .register(steps::PREVM_SETUP, boxed::<PreVmSetup>())
        .register(steps::CONFIG_COMPUTE, boxed::<ConfigCompute>())
        .register(steps::CREATE_VM, boxed::<CreateVm>())
        .register(steps::CREATE_USER, boxed::<CreateUser>())
        .register(steps::POSTVM_INSTALL, boxed::<PostVmInstall>())
        .register(steps::EXASCALE_COMPLETE, boxed::<ExascaleComplete>())
        .register(steps::BACKUPVM_GOLDIMAGE, boxed::<GoldImageBackup>())
});

static BASE_DB: LazyLock<StepFactory> = LazyLock::new(|| {
    StepFactory::new(FactoryKind::BaseDb)
        .register(steps::PREVM_CHECKS, boxed::<PreVmChecks>())
        .register(steps::PREVM_SETUP, boxed::<BaseDbPreVmSetup>())
        .register(steps::CREATE_VM, boxed::<CreateVm>())
        .register(steps::CREATE_USER, boxed::<CreateUser>())
        .register(steps::POSTVM_INSTALL, boxed::<PostVmInstall>())
        .register(steps::EXASCALE_COMPLETE, boxed::<ExascaleComplete>())
        .register(steps::BACKUPVM_GOLDIMAGE, boxed::<GoldImageBackup>())
});

impl StepFactory {
    pub fn new(kind: FactoryKind) -> Self {
        Self {
            kind,
            constructors: HashMap::new(),
        }
    }

    pub fn asm() -> &'static StepFactory {
        &ASM
    }

    pub fn exascale() -> &'static StepFactory {
        &EXASCALE
    }

    pub fn base_db() -> &'static StepFactory {
        &BASE_DB
    }

    pub fn register(mut self, name: &str, constructor: StepConstructor) -> Self {
        self.constructors.insert(name.to_string(), constructor);
        self
    }

    pub fn kind(&self) -> FactoryKind {
        self.kind
    }

    pub fn contains(&self, name: &StepName) -> bool {
        self.constructors.contains_key(name.as_str())
    }

    /// Fresh step instance for `name`; unknown names are configuration errors.
    pub fn resolve(&self, name: &StepName) -> Result<Box<dyn Step>> {
        self.constructors
            .get(name.as_str())
            .map(|construct| construct())
            .ok_or_else(|| ProvisioningError::unknown_step(name))
    }

    pub fn step_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for StepFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepFactory")
            .field("kind", &self.kind)
            .field("steps", &self.step_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use provisioning_primitives::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(StepFactory::asm(), steps::CREATE_STORAGE)]
    #[case(StepFactory::exascale(), steps::CONFIG_COMPUTE)]
    #[case(StepFactory::base_db(), steps::EXASCALE_COMPLETE)]
    fn resolves_registered_steps(#[case] factory: &StepFactory, #[case] name: &str) {
        let step = factory.resolve(&StepName::from(name)).unwrap();
        assert_eq!(step.name(), name);
    }

    #[test]
    fn unknown_step_is_configuration_error() {
        let err = match StepFactory::exascale().resolve(&StepName::from(steps::CREATE_STORAGE)) {
            Ok(_) => panic!("exascale pipelines have no storage step"),
            Err(e) => e,
        };
        assert_matches!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.code(), 0x0781);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(!StepFactory::asm().contains(&StepName::from("estp_create_vm")));
    }

    #[test]
    fn every_resolution_builds_a_new_instance() {
        let name = StepName::from(steps::CREATE_VM);
        let a = StepFactory::asm().resolve(&name).unwrap();
        let b = StepFactory::asm().resolve(&name).unwrap();
        assert!(!std::ptr::eq(
            a.as_ref() as *const dyn Step as *const u8,
            b.as_ref() as *const dyn Step as *const u8
        ));
    }
}
