//! Test fixture for graphiter integration tests
//!
//! Generates a seeded random dataset and answers constraints by brute force
//! over the same primitives, so compiled iterators can be checked exactly.

use graphiter::store::MemoryStoreConfig;
use graphiter::{
    compile, default_comparator, Budget, Comparator, Constraint, Direction, EngineConfig, EvalEnv,
    Id, IdRange, IndexStore, Linkage, MemoryStore, Primitive, SetIterator,
};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Vocabulary names are drawn from; several words share short prefixes
pub const WORDS: &[&str] = &[
    "apex", "apple", "applet", "apricot", "april", "aptitude", "banana", "band", "bandit",
    "cherry", "chess", "delta",
];

pub const TYPES: &[Id] = &[100, 101, 102];

pub const ENDPOINTS: &[Id] = &[1, 2, 3, 4];

/// First id handed out by the generator
pub const FIRST_ID: Id = 10;

/// Test fixture over a generated memory store
pub struct TestFixture {
    env: EvalEnv,
    primitives: Vec<Primitive>,
}

impl TestFixture {
    /// 300 primitives from seed 42, default configuration
    pub fn new() -> Self {
        Self::with_seed(42, 300)
    }

    pub fn with_seed(seed: u64, count: usize) -> Self {
        Self::with_config(seed, count, MemoryStoreConfig::default(), EngineConfig::default())
    }

    pub fn with_config(
        seed: u64,
        count: usize,
        store_config: MemoryStoreConfig,
        config: EngineConfig,
    ) -> Self {
        super::init_logging();
        let primitives = generate(seed, count);
        let store: Arc<dyn IndexStore> =
            Arc::new(MemoryStore::with_primitives(store_config, primitives.clone()));
        log::debug!("Fixture seed {}: {} primitives", seed, primitives.len());
        Self {
            env: EvalEnv::new(store, config),
            primitives,
        }
    }

    /// Primitives with explicit ids and `value` fields, for sort tests
    pub fn with_values(values: &[(Id, &str)]) -> Self {
        super::init_logging();
        let primitives: Vec<Primitive> = values
            .iter()
            .map(|(id, value)| {
                Primitive::new(*id)
                    .with_name(&format!("item {}", id))
                    .with_value(value)
            })
            .collect();
        let store: Arc<dyn IndexStore> = Arc::new(MemoryStore::from_primitives(primitives.clone()));
        Self {
            env: EvalEnv::new(store, EngineConfig::default()),
            primitives,
        }
    }

    pub fn env(&self) -> &EvalEnv {
        &self.env
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn primitive(&self, id: Id) -> Option<&Primitive> {
        self.primitives.iter().find(|p| p.id == id)
    }

    /// Every id the store has allocated
    pub fn full_range(&self) -> IdRange {
        IdRange::up_to(self.env.store.id_limit())
    }

    /// Compile with an unlimited budget
    pub fn compile(
        &self,
        constraint: &Constraint,
        range: Option<IdRange>,
        direction: Direction,
    ) -> Box<dyn SetIterator> {
        compile(constraint, &self.env, range, direction, &mut Budget::unlimited())
            .expect("constraint failed to compile")
    }

    /// Brute-force answer, in iteration order
    pub fn expected(&self, constraint: &Constraint, range: IdRange, direction: Direction) -> Vec<Id> {
        let mut ids: Vec<Id> = match constraint {
            Constraint::Ids { ids } => ids
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            _ => self
                .primitives
                .iter()
                .filter(|p| p.live && self.satisfies(p, constraint))
                .map(|p| p.id)
                .collect(),
        };
        ids.retain(|id| range.contains(*id));
        ids.sort_unstable();
        if direction == Direction::Backward {
            ids.reverse();
        }
        ids
    }

    fn satisfies(&self, primitive: &Primitive, constraint: &Constraint) -> bool {
        let comparator = default_comparator();
        let words = words_of(primitive);
        match constraint {
            Constraint::All => true,
            Constraint::Ids { ids } => ids.contains(&primitive.id),
            Constraint::Word { word } => {
                let wanted = comparator.words(word);
                !wanted.is_empty() && wanted.iter().all(|w| words.contains(w))
            }
            Constraint::Glob { pattern } => {
                let tokens: Vec<&str> = pattern.split_whitespace().collect();
                !tokens.is_empty()
                    && tokens
                        .iter()
                        .all(|token| words.iter().any(|w| comparator.glob(token, w)))
            }
            Constraint::Range { lo, hi } => words.iter().any(|w| {
                lo.as_deref()
                    .map_or(true, |lo| comparator.compare(w, lo) != Ordering::Less)
                    && hi
                        .as_deref()
                        .map_or(true, |hi| comparator.compare(w, hi) == Ordering::Less)
            }),
            Constraint::Linked {
                role,
                endpoint,
                type_id,
            } => {
                primitive.linkage(*role) == Some(*endpoint)
                    && type_id.map_or(true, |t| primitive.type_id == Some(t))
            }
            Constraint::And { all } => all.iter().all(|c| self.satisfies(primitive, c)),
            Constraint::Or { any } => any.iter().any(|c| self.satisfies(primitive, c)),
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Index words of a primitive, as the memory store computes them
pub fn words_of(primitive: &Primitive) -> BTreeSet<String> {
    let comparator = default_comparator();
    primitive
        .name
        .iter()
        .chain(primitive.value.iter())
        .flat_map(|text| comparator.words(text))
        .collect()
}

fn generate(seed: u64, count: usize) -> Vec<Primitive> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut pick = |items: &[Id]| items[rng.usize(..items.len())];
    let mut primitives: Vec<Primitive> = Vec::with_capacity(count);
    for offset in 0..count {
        primitives.push(
            Primitive::new(FIRST_ID + offset as Id)
                .with_link(Linkage::Type, pick(TYPES))
                .with_link(Linkage::Scope, pick(ENDPOINTS)),
        );
    }

    for primitive in &mut primitives {
        let first = WORDS[rng.usize(..WORDS.len())];
        let second = WORDS[rng.usize(..WORDS.len())];
        primitive.name = Some(format!("{} {}", first, second));
        primitive.value = Some(rng.u32(0..50).to_string());
        if rng.bool() {
            primitive.left = Some(ENDPOINTS[rng.usize(..ENDPOINTS.len())]);
        }
        // A few dead primitives keep their ids allocated but leave the indexes
        primitive.live = rng.u8(..10) != 0;
    }
    primitives
}

/// Constraints every property test runs over
pub fn sample_constraints() -> Vec<Constraint> {
    let word = |w: &str| Constraint::Word { word: w.to_string() };
    let glob = |p: &str| Constraint::Glob {
        pattern: p.to_string(),
    };
    vec![
        Constraint::All,
        word("band"),
        glob("ap*"),
        glob("a*"),
        glob("appl*"),
        glob("b?n*"),
        glob("ch* ap*"),
        Constraint::Range {
            lo: Some("b".to_string()),
            hi: Some("chess".to_string()),
        },
        Constraint::Linked {
            role: Linkage::Scope,
            endpoint: 2,
            type_id: Some(101),
        },
        Constraint::Linked {
            role: Linkage::Left,
            endpoint: 3,
            type_id: None,
        },
        Constraint::And {
            all: vec![
                glob("ap*"),
                Constraint::Linked {
                    role: Linkage::Scope,
                    endpoint: 1,
                    type_id: Some(100),
                },
            ],
        },
        Constraint::Or {
            any: vec![
                word("delta"),
                glob("che*"),
                Constraint::Linked {
                    role: Linkage::Left,
                    endpoint: 1,
                    type_id: None,
                },
            ],
        },
        Constraint::Ids {
            ids: vec![40, 11, 12, 500],
        },
    ]
}
