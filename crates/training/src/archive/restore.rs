//! Restore: decode a persisted training archive, rehydrate live
//! back-references, and rebuild dependency accounting.
//!
//! Restoration produces a second graph reachable only through lookups on
//! [`RestoredTrainingData`]; the recording registry of the current run is
//! untouched. Decoding interns every archived symbol into the restoring
//! runtime (marking it shared, so archive hashes stay computable),
//! `restore_unshareable` resolves live classes and methods, and
//! `initialize` recomputes each compile record's unresolved-dependency
//! counter from the current class-initialization states — the archived
//! counters are history, not truth.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use lyra_common::{ClassStrongHandle, Runtime, Symbol};
use rustc_hash::FxHashMap;
use tracing::info;

use super::format::{
    ARCHIVE_MAGIC, ARCHIVE_VERSION, ByteReader, TAG_COMPILE, TAG_KLASS, TAG_METHOD,
};
use crate::error::ArchiveError;
use crate::graph::{
    CompileTrainingData, KlassTrainingData, MethodTrainingData, RecordId, RecordKind,
    TrainingGraph, TrainingRecord,
};
use crate::key::TrainingKey;

const LAST_TOPLEVEL_SLOTS: usize = crate::graph::MAX_TIER as usize + 1;

/// Training data restored from a persisted archive.
#[derive(Debug)]
pub struct RestoredTrainingData {
    graph: TrainingGraph,
    /// Sorted `(archive hash, record)` pairs; duplicates are resolved by
    /// key comparison at lookup time.
    dictionary: Vec<(u64, RecordId)>,
    schedule: Vec<RecordId>,
}

impl RestoredTrainingData {
    /// Decode an archive buffer, interning its symbols into `runtime`.
    pub fn decode(bytes: &[u8], runtime: &Runtime) -> Result<Self, ArchiveError> {
        let mut reader = ByteReader::new(bytes);

        let magic = reader.u32()?;
        if magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic(magic));
        }
        let version = reader.u32()?;
        if version != ARCHIVE_VERSION {
            return Err(ArchiveError::UnsupportedVersion {
                found: version,
                expected: ARCHIVE_VERSION,
            });
        }

        let symbol_count = reader.u32()? as usize;
        let mut symbols: Vec<Symbol> = Vec::with_capacity(symbol_count.min(4096));
        for _ in 0..symbol_count {
            let text = reader.string()?;
            let symbol = runtime.intern(&text);
            symbol.mark_shared();
            symbols.push(symbol);
        }
        let symbol_bound = symbols.len() as u32;

        let record_count = reader.u32()?;
        let mut records = Vec::with_capacity((record_count as usize).min(1 << 20));
        for _ in 0..record_count {
            let tag = reader.u8()?;
            let record = match tag {
                TAG_KLASS => {
                    let name = reader.bounded_u32(symbol_bound)?;
                    let loader = reader.bounded_u32(symbol_bound)?;
                    let init_deps = reader.index_list(record_count)?;
                    let comp_deps = reader.index_list(record_count)?;
                    TrainingRecord::Klass(KlassTrainingData {
                        key: TrainingKey::Klass {
                            name: symbols[name as usize].clone(),
                            loader: symbols[loader as usize].clone(),
                        },
                        holder: None,
                        init_deps: to_record_ids(&init_deps),
                        comp_deps: to_record_ids(&comp_deps),
                    })
                }
                TAG_METHOD => {
                    let class_name = reader.bounded_u32(symbol_bound)?;
                    let loader = reader.bounded_u32(symbol_bound)?;
                    let name = reader.bounded_u32(symbol_bound)?;
                    let signature = reader.bounded_u32(symbol_bound)?;
                    let klass = reader.bounded_u32(record_count)?;
                    let compiles = reader.index_list(record_count)?;
                    let mut last_toplevel = [None; LAST_TOPLEVEL_SLOTS];
                    for slot in &mut last_toplevel {
                        let raw = reader.opt_u32()?;
                        if let Some(raw) = raw {
                            if raw >= record_count {
                                return Err(ArchiveError::Corrupt(format!(
                                    "last-compile slot index {raw} out of range"
                                )));
                            }
                            *slot = Some(RecordId::from_raw(raw));
                        }
                    }
                    let levels_seen = reader.u8()?;
                    let flags = reader.u8()?;
                    TrainingRecord::Method(MethodTrainingData {
                        key: TrainingKey::Method {
                            class_name: symbols[class_name as usize].clone(),
                            loader: symbols[loader as usize].clone(),
                            name: symbols[name as usize].clone(),
                            signature: symbols[signature as usize].clone(),
                        },
                        klass: RecordId::from_raw(klass),
                        holder: None,
                        compiles: to_record_ids(&compiles),
                        last_toplevel,
                        levels_seen,
                        was_inlined: flags & 1 != 0,
                        was_toplevel: flags & 2 != 0,
                    })
                }
                TAG_COMPILE => {
                    let method = reader.bounded_u32(record_count)?;
                    let level = reader.u8()?;
                    let compile_id = reader.u64()?;
                    let code_size = reader.opt_u32()?;
                    let queued_ms = reader.u64()?;
                    let started_ms = reader.u64()?;
                    let ended_ms = reader.u64()?;
                    let init_deps = reader.index_list(record_count)?;
                    TrainingRecord::Compile(CompileTrainingData {
                        method: RecordId::from_raw(method),
                        level,
                        compile_id,
                        code_size,
                        queued_ms,
                        started_ms,
                        ended_ms,
                        init_deps: to_record_ids(&init_deps),
                        init_deps_left: AtomicU32::new(0),
                        memo: FxHashMap::default(),
                    })
                }
                other => {
                    return Err(ArchiveError::Corrupt(format!("unknown record tag {other}")));
                }
            };
            records.push(record);
        }

        let dictionary_count = reader.u32()? as usize;
        let mut dictionary = Vec::with_capacity(dictionary_count.min(1 << 20));
        for _ in 0..dictionary_count {
            let hash = reader.u64()?;
            let index = reader.bounded_u32(record_count)?;
            dictionary.push((hash, RecordId::from_raw(index)));
        }

        let schedule_count = reader.u32()? as usize;
        let mut schedule = Vec::with_capacity(schedule_count.min(1 << 20));
        for _ in 0..schedule_count {
            schedule.push(RecordId::from_raw(reader.bounded_u32(record_count)?));
        }

        info!(
            records = record_count,
            dictionary = dictionary.len(),
            schedule = schedule.len(),
            trailing_bytes = reader.remaining(),
            "decoded training archive"
        );

        Ok(Self {
            graph: TrainingGraph::from_parts(records),
            dictionary,
            schedule,
        })
    }

    /// Read and decode an archive file.
    pub fn load_from_file(
        path: impl AsRef<Path>,
        runtime: &Runtime,
    ) -> Result<Self, ArchiveError> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes, runtime)
    }

    /// Rehydrate live back-references from the restoring runtime: class
    /// holders first, then method holders resolved through them. Records
    /// whose class or method no longer exists stay symbolic. Returns the
    /// number of records that got a live holder.
    pub fn restore_unshareable(&self, runtime: &Runtime) -> usize {
        let mut inner = self.graph.write();
        let mut rehydrated = 0usize;

        for i in 0..inner.records.len() {
            let klass = match &inner.records[i] {
                TrainingRecord::Klass(k) => {
                    let TrainingKey::Klass { name, loader } = &k.key else {
                        continue;
                    };
                    runtime.find_class(name, loader)
                }
                _ => continue,
            };
            if let Some(klass) = klass
                && let Some(record) = inner.klass_mut(RecordId::from_index(i))
            {
                record.holder = Some(ClassStrongHandle::new(klass));
                rehydrated += 1;
            }
        }

        for i in 0..inner.records.len() {
            let resolved = match &inner.records[i] {
                TrainingRecord::Method(m) => {
                    let TrainingKey::Method { name, signature, .. } = &m.key else {
                        continue;
                    };
                    inner
                        .klass(m.klass)
                        .and_then(|k| k.holder.as_ref())
                        .and_then(|h| h.klass().find_method(name, signature))
                }
                _ => continue,
            };
            if let Some(method) = resolved
                && let Some(record) = inner.method_mut(RecordId::from_index(i))
            {
                record.holder = Some(method);
                rehydrated += 1;
            }
        }

        rehydrated
    }

    /// Recompute every compile record's unresolved-dependency counter
    /// from the current class-initialization states.
    pub fn initialize(&self) {
        let inner = self.graph.write();
        for i in 0..inner.records.len() {
            let id = RecordId::from_index(i);
            if let TrainingRecord::Compile(_) = &inner.records[i] {
                let left = crate::graph::compute_init_deps_left_locked(&inner, id, false);
                if let Some(compile) = inner.compile(id) {
                    compile.init_deps_left.store(left, Ordering::Release);
                }
            }
        }
    }

    /// Look up an archived record by key.
    ///
    /// Fails quietly with `None` when the key is not archivable (a symbol
    /// outside the shared region), when no record matches, or when the
    /// matching record is symbolic — archived entries without a live
    /// holder are metadata, not lookup results.
    pub fn lookup_archived(&self, key: &TrainingKey) -> Option<RecordId> {
        let id = self.lookup_including_symbolic(key)?;
        let resolved = match self.graph.kind(id)? {
            RecordKind::Klass => self.graph.klass_holder(id).is_some(),
            RecordKind::Method => self.graph.method_holder(id).is_some(),
            RecordKind::Compile => false,
        };
        if !resolved {
            return None;
        }
        self.graph
            .metrics()
            .archived_hits
            .fetch_add(1, Ordering::Relaxed);
        Some(id)
    }

    /// Dictionary lookup without the live-holder filter, for debugging
    /// and archive introspection.
    pub fn lookup_including_symbolic(&self, key: &TrainingKey) -> Option<RecordId> {
        self.graph
            .metrics()
            .archived_lookups
            .fetch_add(1, Ordering::Relaxed);
        let hash = key.archive_hash()?;
        let start = self.dictionary.partition_point(|(h, _)| *h < hash);
        self.dictionary[start..]
            .iter()
            .take_while(|(h, _)| *h == hash)
            .map(|(_, id)| *id)
            .find(|id| self.graph.key_of(*id).as_ref() == Some(key))
    }

    pub fn graph(&self) -> &TrainingGraph {
        &self.graph
    }

    /// The archived recompilation schedule, as method records of the
    /// restored graph.
    pub fn schedule(&self) -> &[RecordId] {
        &self.schedule
    }

    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }
}

fn to_record_ids(raw: &[u32]) -> Vec<RecordId> {
    raw.iter().map(|&r| RecordId::from_raw(r)).collect()
}
