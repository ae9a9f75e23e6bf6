//! Chooses the pipeline table and step factory for a deployment variant.
//!
//! Selection is an ordered list of (predicate, pipeline) rules evaluated
//! top-down; the first matching rule wins. Pure and deterministic.

use crate::factory::StepFactory;
use crate::table::{
    PipelineTable, BASE_DB_TABLE, DEFAULT_TABLE, EDV_TABLE, EIGHTH_TABLE, XS_EIGHTH_TABLE,
    XS_TABLE, ZRACK_TABLE,
};
use provisioning_primitives::{ProvisioningError, RackSize, Result, StepList, VariantFlags};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    XsEighth,
    Xs,
    BaseDb,
    Edv,
    Eighth,
    ZRack,
    Default,
}

impl PipelineKind {
    pub fn table(&self) -> &'static PipelineTable {
        match self {
            PipelineKind::XsEighth => &*XS_EIGHTH_TABLE,
            PipelineKind::Xs => &*XS_TABLE,
            PipelineKind::BaseDb => &*BASE_DB_TABLE,
            PipelineKind::Edv => &*EDV_TABLE,
            PipelineKind::Eighth => &*EIGHTH_TABLE,
            PipelineKind::ZRack => &*ZRACK_TABLE,
            PipelineKind::Default => &*DEFAULT_TABLE,
        }
    }

    pub fn factory(&self) -> &'static StepFactory {
        match self {
            PipelineKind::XsEighth | PipelineKind::Xs => StepFactory::exascale(),
            PipelineKind::BaseDb => StepFactory::base_db(),
            PipelineKind::Edv
            | PipelineKind::Eighth
            | PipelineKind::ZRack
            | PipelineKind::Default => StepFactory::asm(),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table().name())
    }
}

/// Selected pipeline: the display table plus the factory resolving its steps.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    pub kind: PipelineKind,
    pub table: &'static PipelineTable,
    pub factory: &'static StepFactory,
}

impl Pipeline {
    pub fn of(kind: PipelineKind) -> Self {
        Self {
            kind,
            table: kind.table(),
            factory: kind.factory(),
        }
    }

    /// Every step of the table, in table order.
    pub fn full_step_list(&self) -> StepList {
        self.table.entries().iter().map(|e| e.step.clone()).collect()
    }
}

struct Rule {
    matches: fn(&VariantFlags) -> bool,
    kind: PipelineKind,
}

static RULES: [Rule; 7] = [
    Rule {
        matches: |f| f.is_xs && f.rack_size == RackSize::Eighth,
        kind: PipelineKind::XsEighth,
    },
    Rule {
        matches: |f| f.is_xs,
        kind: PipelineKind::Xs,
    },
    Rule {
        matches: |f| f.is_base_db || f.is_exacompute_vm,
        kind: PipelineKind::BaseDb,
    },
    Rule {
        matches: |f| f.is_edv_image_supported,
        kind: PipelineKind::Edv,
    },
    Rule {
        matches: |f| f.rack_size == RackSize::Eighth,
        kind: PipelineKind::Eighth,
    },
    Rule {
        matches: |f| f.rack_size == RackSize::ZRack,
        kind: PipelineKind::ZRack,
    },
    Rule {
        matches: |f| {
            matches!(
                f.rack_size,
                RackSize::Quarter | RackSize::Half | RackSize::Full | RackSize::Elastic
            )
        },
        kind: PipelineKind::Default,
    },
];

pub fn select(flags: &VariantFlags) -> Result<Pipeline> {
    let rule = RULES.iter().find(|rule| (rule.matches)(flags)).ok_or_else(|| {
        ProvisioningError::configuration(format!("no pipeline matches variant {flags:?}"))
    })?;
    tracing::debug!("Variant {flags:?} selects the {} pipeline", rule.kind);
    Ok(Pipeline::of(rule.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::FactoryKind;
    use rstest::rstest;

    fn flags(
        is_xs: bool,
        rack_size: RackSize,
        is_base_db: bool,
        is_exacompute_vm: bool,
        is_edv_image_supported: bool,
    ) -> VariantFlags {
        VariantFlags {
            is_xs,
            rack_size,
            is_base_db,
            is_exacompute_vm,
            is_edv_image_supported,
        }
    }

    #[rstest]
    #[case(flags(true, RackSize::Eighth, false, false, false), PipelineKind::XsEighth)]
    #[case(flags(true, RackSize::Eighth, true, false, true), PipelineKind::XsEighth)]
    #[case(flags(true, RackSize::Full, false, false, false), PipelineKind::Xs)]
    #[case(flags(true, RackSize::ZRack, true, false, false), PipelineKind::Xs)]
    #[case(flags(false, RackSize::Eighth, true, false, false), PipelineKind::BaseDb)]
    #[case(flags(false, RackSize::ZRack, true, false, true), PipelineKind::BaseDb)]
    #[case(flags(false, RackSize::Quarter, false, true, false), PipelineKind::BaseDb)]
    #[case(flags(false, RackSize::Eighth, false, false, true), PipelineKind::Edv)]
    #[case(flags(false, RackSize::ZRack, false, false, true), PipelineKind::Edv)]
    #[case(flags(false, RackSize::Eighth, false, false, false), PipelineKind::Eighth)]
    #[case(flags(false, RackSize::ZRack, false, false, false), PipelineKind::ZRack)]
    #[case(flags(false, RackSize::Half, false, false, false), PipelineKind::Default)]
    #[case(flags(false, RackSize::Elastic, false, false, false), PipelineKind::Default)]
    fn rules_apply_top_down(#[case] variant: VariantFlags, #[case] expected: PipelineKind) {
        assert_eq!(select(&variant).unwrap().kind, expected);
    }

    #[test]
    fn xs_eighth_rack_pairs_with_exascale_factory() {
        let pipeline = select(&flags(true, RackSize::Eighth, false, false, false)).unwrap();
        assert!(std::ptr::eq(pipeline.table, &*XS_EIGHTH_TABLE));
        assert_eq!(pipeline.factory.kind(), FactoryKind::Exascale);
    }

    #[rstest]
    fn base_db_ignores_rack_size(
        #[values(
            RackSize::Eighth,
            RackSize::Quarter,
            RackSize::Half,
            RackSize::Full,
            RackSize::ZRack,
            RackSize::Elastic
        )]
        rack: RackSize,
    ) {
        let pipeline = select(&flags(false, rack, true, false, false)).unwrap();
        assert!(std::ptr::eq(pipeline.table, &*BASE_DB_TABLE));
        assert_eq!(pipeline.factory.kind(), FactoryKind::BaseDb);
    }

    #[test]
    fn selection_is_deterministic_over_all_variants() {
        let racks = [
            RackSize::Eighth,
            RackSize::Quarter,
            RackSize::Half,
            RackSize::Full,
            RackSize::ZRack,
            RackSize::Elastic,
        ];
        for rack in racks {
            for bits in 0u8..16 {
                let variant = flags(bits & 1 != 0, rack, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0);
                let first = select(&variant).unwrap();
                let second = select(&variant).unwrap();
                assert_eq!(first.kind, second.kind);
                assert!(std::ptr::eq(first.table, second.table));
                assert!(std::ptr::eq(first.factory, second.factory));
            }
        }
    }

    #[rstest]
    fn every_table_step_resolves_in_its_factory(
        #[values(
            PipelineKind::XsEighth,
            PipelineKind::Xs,
            PipelineKind::BaseDb,
            PipelineKind::Edv,
            PipelineKind::Eighth,
            PipelineKind::ZRack,
            PipelineKind::Default
        )]
        kind: PipelineKind,
    ) {
        let pipeline = Pipeline::of(kind);
        assert!(!pipeline.table.is_empty());
        for entry in pipeline.table.entries() {
            let step = pipeline.factory.resolve(&entry.step).unwrap();
            assert_eq!(step.name(), &entry.step);
        }
    }

    #[test]
    fn full_step_list_follows_table_order() {
        let list = Pipeline::of(PipelineKind::Default).full_step_list();
        assert_eq!(list.len(), DEFAULT_TABLE.len());
        assert_eq!(list.iter().next().unwrap(), "ESTP_PREVM_CHECKS");
    }
}
