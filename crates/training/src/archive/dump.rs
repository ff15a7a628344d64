//! Dump-time preparation and serialization.
//!
//! `TrainingDump::prepare` freezes the registry, computes the retained
//! record set (classes excluded from the archive are compacted out along
//! with their methods and compilations), flattens every edge list into
//! index form, collects the symbol table, builds the hash dictionary, and
//! derives the recompilation schedule from the method profiler. `encode`
//! then writes the sections; all intra-archive references are indices, so
//! the writer needs no relocation pass.

use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use lyra_common::{Method, Symbol};
use rustc_hash::FxHashMap;
use tracing::info;

use super::format::{
    self, ARCHIVE_MAGIC, ARCHIVE_VERSION, TAG_COMPILE, TAG_KLASS, TAG_METHOD,
};
use crate::config::TrainingConfig;
use crate::error::ArchiveError;
use crate::graph::{RecordId, TrainingGraph};
use crate::key::TrainingKey;

/// One sampled native method, as reported by the ambient profiler.
#[derive(Debug, Clone)]
pub struct SampledMethod {
    pub method: Arc<Method>,
    pub samples: u64,
}

/// The ambient method profiler consulted while preparing the schedule.
pub trait MethodProfiler {
    /// Sampled native methods, ordered by sample count descending.
    fn sampled_nmethods(&self) -> Vec<SampledMethod>;
}

const LAST_TOPLEVEL_SLOTS: usize = crate::graph::MAX_TIER as usize + 1;

#[derive(Debug)]
enum DumpRecord {
    Klass {
        name: u32,
        loader: u32,
        init_deps: Vec<u32>,
        comp_deps: Vec<u32>,
    },
    Method {
        class_name: u32,
        loader: u32,
        name: u32,
        signature: u32,
        klass: u32,
        compiles: Vec<u32>,
        last_toplevel: [Option<u32>; LAST_TOPLEVEL_SLOTS],
        levels_seen: u8,
        was_inlined: bool,
        was_toplevel: bool,
    },
    Compile {
        method: u32,
        level: u8,
        compile_id: u64,
        code_size: Option<u32>,
        queued_ms: u64,
        started_ms: u64,
        ended_ms: u64,
        init_deps: Vec<u32>,
    },
}

/// A flattened, compacted snapshot of the training graph, ready to write.
#[derive(Debug)]
pub struct TrainingDump {
    symbols: Vec<Symbol>,
    records: Vec<DumpRecord>,
    dictionary: Vec<(u64, u32)>,
    schedule: Vec<u32>,
}

/// Tracks symbol interning into the dump's symbol section.
#[derive(Default)]
struct SymbolSection {
    symbols: Vec<Symbol>,
    by_identity: FxHashMap<Symbol, u32>,
}

impl SymbolSection {
    fn index_of(&mut self, symbol: &Symbol) -> u32 {
        if let Some(&index) = self.by_identity.get(symbol) {
            return index;
        }
        let index = self.symbols.len() as u32;
        // Written symbols live in the persisted region from now on.
        symbol.mark_shared();
        self.symbols.push(symbol.clone());
        self.by_identity.insert(symbol.clone(), index);
        index
    }
}

impl TrainingDump {
    /// Snapshot the graph into a dump.
    ///
    /// Freezes insertions for the duration of the scan; concurrent
    /// insert attempts observe `None` and are dropped, as recording
    /// contracts allow.
    pub fn prepare(
        graph: &TrainingGraph,
        profiler: Option<&dyn MethodProfiler>,
        config: &TrainingConfig,
    ) -> Self {
        graph.begin_snapshot();
        let dump = Self::prepare_frozen(graph, profiler, config);
        graph.end_snapshot();
        info!(
            records = dump.records.len(),
            dictionary = dump.dictionary.len(),
            schedule = dump.schedule.len(),
            "prepared training dump"
        );
        dump
    }

    fn prepare_frozen(
        graph: &TrainingGraph,
        profiler: Option<&dyn MethodProfiler>,
        config: &TrainingConfig,
    ) -> Self {
        use crate::graph::TrainingRecord;

        let inner = graph.read();

        // Cleanup pass: classes excluded from the archive lose their
        // records, and their methods and compilations go with them.
        // Records whose class is merely unloaded stay as symbolic entries.
        let mut excluded = vec![false; inner.records.len()];
        for (i, record) in inner.records.iter().enumerate() {
            if let TrainingRecord::Klass(k) = record {
                excluded[i] = k
                    .holder
                    .as_ref()
                    .is_some_and(|h| h.klass().is_archive_excluded());
            }
        }
        for (i, record) in inner.records.iter().enumerate() {
            if let TrainingRecord::Method(m) = record {
                excluded[i] = excluded[m.klass.index()];
            }
        }
        for (i, record) in inner.records.iter().enumerate() {
            if let TrainingRecord::Compile(c) = record {
                excluded[i] = excluded[c.method.index()];
            }
        }

        // Compaction: assign dump indices to the retained records.
        let mut remap: Vec<Option<u32>> = vec![None; inner.records.len()];
        let mut next = 0u32;
        for (i, dropped) in excluded.iter().enumerate() {
            if !dropped {
                remap[i] = Some(next);
                next += 1;
            }
        }
        let map_edges = |edges: &[RecordId]| -> Vec<u32> {
            edges.iter().filter_map(|id| remap[id.index()]).collect()
        };

        let mut symbols = SymbolSection::default();
        let mut records = Vec::with_capacity(next as usize);
        let mut dictionary = Vec::new();

        for (i, record) in inner.records.iter().enumerate() {
            let Some(dump_index) = remap[i] else {
                continue;
            };
            match record {
                TrainingRecord::Klass(k) => {
                    let TrainingKey::Klass { name, loader } = &k.key else {
                        unreachable!("klass record {i} carries a non-class key");
                    };
                    let name_idx = symbols.index_of(name);
                    let loader_idx = symbols.index_of(loader);
                    if let Some(hash) = k.key.archive_hash() {
                        dictionary.push((hash, dump_index));
                    }
                    records.push(DumpRecord::Klass {
                        name: name_idx,
                        loader: loader_idx,
                        init_deps: map_edges(&k.init_deps),
                        comp_deps: map_edges(&k.comp_deps),
                    });
                }
                TrainingRecord::Method(m) => {
                    let TrainingKey::Method {
                        class_name,
                        loader,
                        name,
                        signature,
                    } = &m.key
                    else {
                        unreachable!("method record {i} carries a non-method key");
                    };
                    let class_name_idx = symbols.index_of(class_name);
                    let loader_idx = symbols.index_of(loader);
                    let name_idx = symbols.index_of(name);
                    let signature_idx = symbols.index_of(signature);
                    if let Some(hash) = m.key.archive_hash() {
                        dictionary.push((hash, dump_index));
                    }
                    // Exclusion propagates class → method, so a retained
                    // method always has a retained class.
                    let Some(klass) = remap[m.klass.index()] else {
                        unreachable!("method record {i} retained without its class");
                    };
                    let mut last_toplevel = [None; LAST_TOPLEVEL_SLOTS];
                    for (slot, id) in m.last_toplevel.iter().enumerate() {
                        last_toplevel[slot] = id.and_then(|c| remap[c.index()]);
                    }
                    records.push(DumpRecord::Method {
                        class_name: class_name_idx,
                        loader: loader_idx,
                        name: name_idx,
                        signature: signature_idx,
                        klass,
                        compiles: map_edges(&m.compiles),
                        last_toplevel,
                        levels_seen: m.levels_seen,
                        was_inlined: m.was_inlined,
                        was_toplevel: m.was_toplevel,
                    });
                }
                TrainingRecord::Compile(c) => {
                    let Some(method) = remap[c.method.index()] else {
                        unreachable!("compile record {i} retained without its method");
                    };
                    records.push(DumpRecord::Compile {
                        method,
                        level: c.level,
                        compile_id: c.compile_id,
                        code_size: c.code_size,
                        queued_ms: c.queued_ms,
                        started_ms: c.started_ms,
                        ended_ms: c.ended_ms,
                        init_deps: map_edges(&c.init_deps),
                    });
                }
            }
        }

        dictionary.sort_unstable();

        // Schedule: walk the profiler's sampled methods, most-sampled
        // first. With `record_only_top_compilations` the walk stops at
        // the first zero-sampled entry; otherwise zero-sampled entries
        // are skipped but the walk continues.
        let mut schedule = Vec::new();
        if let Some(profiler) = profiler {
            for sampled in profiler.sampled_nmethods() {
                if sampled.samples == 0 {
                    if config.record_only_top_compilations {
                        break;
                    }
                    continue;
                }
                let Some(key) = TrainingKey::of_method(&sampled.method) else {
                    continue;
                };
                let Some(&id) = inner.index.get(&key) else {
                    continue;
                };
                if let Some(dump_index) = remap[id.index()] {
                    schedule.push(dump_index);
                }
            }
        }

        Self {
            symbols: symbols.symbols,
            records,
            dictionary,
            schedule,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn schedule_len(&self) -> usize {
        self.schedule.len()
    }

    /// Serialize the dump into the persisted layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(ARCHIVE_MAGIC);
        buf.put_u32_le(ARCHIVE_VERSION);

        buf.put_u32_le(self.symbols.len() as u32);
        for symbol in &self.symbols {
            let text = symbol.as_str().as_bytes();
            buf.put_u16_le(text.len() as u16);
            buf.put_slice(text);
        }

        buf.put_u32_le(self.records.len() as u32);
        for record in &self.records {
            match record {
                DumpRecord::Klass {
                    name,
                    loader,
                    init_deps,
                    comp_deps,
                } => {
                    buf.put_u8(TAG_KLASS);
                    buf.put_u32_le(*name);
                    buf.put_u32_le(*loader);
                    format::put_index_list(&mut buf, init_deps);
                    format::put_index_list(&mut buf, comp_deps);
                }
                DumpRecord::Method {
                    class_name,
                    loader,
                    name,
                    signature,
                    klass,
                    compiles,
                    last_toplevel,
                    levels_seen,
                    was_inlined,
                    was_toplevel,
                } => {
                    buf.put_u8(TAG_METHOD);
                    buf.put_u32_le(*class_name);
                    buf.put_u32_le(*loader);
                    buf.put_u32_le(*name);
                    buf.put_u32_le(*signature);
                    buf.put_u32_le(*klass);
                    format::put_index_list(&mut buf, compiles);
                    for slot in last_toplevel {
                        format::put_opt_u32(&mut buf, *slot);
                    }
                    buf.put_u8(*levels_seen);
                    let flags = u8::from(*was_inlined) | (u8::from(*was_toplevel) << 1);
                    buf.put_u8(flags);
                }
                DumpRecord::Compile {
                    method,
                    level,
                    compile_id,
                    code_size,
                    queued_ms,
                    started_ms,
                    ended_ms,
                    init_deps,
                } => {
                    buf.put_u8(TAG_COMPILE);
                    buf.put_u32_le(*method);
                    buf.put_u8(*level);
                    buf.put_u64_le(*compile_id);
                    format::put_opt_u32(&mut buf, *code_size);
                    buf.put_u64_le(*queued_ms);
                    buf.put_u64_le(*started_ms);
                    buf.put_u64_le(*ended_ms);
                    format::put_index_list(&mut buf, init_deps);
                }
            }
        }

        buf.put_u32_le(self.dictionary.len() as u32);
        for (hash, index) in &self.dictionary {
            buf.put_u64_le(*hash);
            buf.put_u32_le(*index);
        }

        buf.put_u32_le(self.schedule.len() as u32);
        for index in &self.schedule {
            buf.put_u32_le(*index);
        }

        buf.freeze()
    }

    /// Encode and write the archive to a file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        std::fs::write(path, self.encode())?;
        Ok(())
    }
}
