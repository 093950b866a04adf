use evo_core::{
    AgentRecord, CategoricalParam, ConfigTree, ConfigValue, EvoError, EvolutionSettings,
    NumericParam, ParentSelection,
};
use evo_evolution::{merge, mutate, EvolutionEngine, MutationParams};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn seeded_config(lr: f64) -> ConfigTree {
    ConfigTree::new()
        .with_numeric("lr", NumericParam::new(lr).with_range(0.0, 1.0))
        .with_bool("warmup", true)
        .with_choice("optimizer", CategoricalParam::new("adam", &["adam", "sgd"]))
}

fn finished(fitness: f64) -> AgentRecord {
    let mut r = AgentRecord::new("nanogpt", seeded_config(fitness / 2.0));
    r.mark_queued().unwrap();
    r.mark_running(None).unwrap();
    r.complete(fitness, vec![]).unwrap();
    r
}

#[test]
fn test_elites_plus_offspring_fill_population() {
    let cohort: Vec<_> = [0.9, 0.8, 0.7, 0.6].into_iter().map(finished).collect();
    let mut engine = EvolutionEngine::new(EvolutionSettings {
        elite_fraction: 0.5,
        ..EvolutionSettings::default()
    });

    let plan = engine.plan(&cohort).unwrap();
    assert_eq!(plan.elites, vec![cohort[0].id, cohort[1].id]);
    assert_eq!(plan.offspring.len(), 2);
    assert_eq!(plan.best_fitness, Some(0.9));
    for child in &plan.offspring {
        assert_eq!(child.generation, 1);
        assert!(!child.parent_ids.is_empty() && child.parent_ids.len() <= 2);
        assert!(child.parent_ids.iter().all(|p| plan.elites.contains(p)));
        assert!(child.config.validate().is_ok());
    }
}

#[test]
fn test_failed_agents_are_never_parents() {
    let mut failed = AgentRecord::new("nanogpt", seeded_config(0.1));
    failed.mark_queued().unwrap();
    failed.mark_running(None).unwrap();
    failed.fail(&evo_core::ExecutionFailure::NonZeroExit(1)).unwrap();
    let cohort = vec![failed, finished(0.3)];

    let mut engine = EvolutionEngine::new(EvolutionSettings::default());
    let plan = engine.plan(&cohort).unwrap();
    assert_eq!(plan.elites, vec![cohort[1].id]);
    assert!(plan
        .offspring
        .iter()
        .all(|c| c.parent_ids == vec![cohort[1].id]));
}

#[test]
fn test_no_completed_agents_is_an_error() {
    let cohort = vec![AgentRecord::new("k", ConfigTree::new())];
    let mut engine = EvolutionEngine::new(EvolutionSettings::default());
    assert!(matches!(engine.plan(&cohort), Err(EvoError::NoViableParents)));
}

#[test]
fn test_configured_population_size_wins() {
    let cohort: Vec<_> = [0.5, 0.4].into_iter().map(finished).collect();
    let mut engine = EvolutionEngine::new(EvolutionSettings {
        population_size: Some(6),
        parent_selection: ParentSelection::Cycle,
        ..EvolutionSettings::default()
    });
    let plan = engine.plan(&cohort).unwrap();
    assert_eq!(plan.elites.len(), 1);
    assert_eq!(plan.offspring.len(), 5);
}

#[test]
fn test_same_seed_same_offspring_configs() {
    let cohort: Vec<_> = [0.9, 0.7, 0.5].into_iter().map(finished).collect();
    let settings = EvolutionSettings {
        mutation_rate: 0.7,
        elite_fraction: 0.67,
        ..EvolutionSettings::default()
    };
    let configs = |mut engine: EvolutionEngine| -> Vec<ConfigTree> {
        engine
            .plan(&cohort)
            .unwrap()
            .offspring
            .into_iter()
            .map(|c| c.config)
            .collect()
    };
    pretty_assertions::assert_eq!(
        configs(EvolutionEngine::new(settings.clone())),
        configs(EvolutionEngine::new(settings))
    );
}

fn leaf() -> impl Strategy<Value = ConfigValue> {
    prop_oneof![
        (0.0f64..100.0, any::<bool>()).prop_map(|(v, bounded)| {
            let p = NumericParam::new(v);
            ConfigValue::Numeric(if bounded { p.with_range(0.0, 100.0) } else { p })
        }),
        any::<bool>().prop_map(ConfigValue::Boolean),
        prop::sample::select(vec!["a", "b", "c"])
            .prop_map(|v| ConfigValue::Categorical(CategoricalParam::new(v, &["a", "b", "c"]))),
    ]
}

fn tree() -> impl Strategy<Value = ConfigTree> {
    let flat = prop::collection::btree_map("[a-e]", leaf(), 0..5)
        .prop_map(|m| m.into_iter().collect::<ConfigTree>());
    flat.prop_recursive(2, 16, 4, |inner| {
        prop::collection::btree_map("[f-h]", inner.prop_map(ConfigValue::Nested), 0..3)
            .prop_map(|m| m.into_iter().collect::<ConfigTree>())
    })
}

proptest! {
    #[test]
    fn prop_merge_with_self_is_identity(a in tree(), alpha in 0.0f64..=1.0) {
        prop_assert_eq!(merge(&a, &a, alpha), a);
    }

    #[test]
    fn prop_zero_rate_mutation_is_identity(a in tree(), seed in any::<u64>()) {
        let params = MutationParams { rate: 0.0, perturbation_scale: 0.2 };
        let mut rng = StdRng::seed_from_u64(seed);
        prop_assert_eq!(mutate(&a, &params, &mut rng), a);
    }

    #[test]
    fn prop_mutation_keeps_configs_valid(a in tree(), seed in any::<u64>()) {
        let params = MutationParams { rate: 1.0, perturbation_scale: 0.5 };
        let mut rng = StdRng::seed_from_u64(seed);
        prop_assert!(mutate(&a, &params, &mut rng).validate().is_ok());
    }

    #[test]
    fn prop_merge_keeps_configs_valid(a in tree(), b in tree(), alpha in 0.0f64..=1.0) {
        prop_assert!(merge(&a, &b, alpha).validate().is_ok());
    }
}
