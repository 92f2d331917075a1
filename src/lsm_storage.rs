//! Top-level coordinator: the write path, read path, iterator construction,
//! background flush/compaction, and crash recovery. State is published as
//! `RwLock<Arc<State>>` snapshots, cloned out under the lock and read
//! lock-free afterwards.

use std::{
    collections::{HashMap, HashSet},
    ops::Bound,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::{
    compact::{CompactionController, CompactionTask},
    error::{Error, Result},
    iterators::{merge_iterator::MergeIterator, StorageIterator},
    key::KeySlice,
    lsm_iterator::{BoundedUserIterator, EngineChildIterator, MergedIterator, UserIterator},
    manifest::{manifest_path, read_current, wal_path, write_current, Manifest, ManifestRecord, SsTableInfo},
    mem_table::MemTable,
    mvcc::Transaction,
    options::{CompactionType, ObLsmOptions, ObLsmReadOptions, CURRENT_SEQ},
    table::{builder::SsTableBuilder, iterator::SsTableIterator, FileObject, SsTable},
};

/// LRU cache of decoded blocks, shared by every SSTable opened by this
/// engine.
pub type BlockCache = crate::cache::BlockCache;

/// The live set of memtables and SSTables, published as an immutable
/// snapshot under `LsmStorageInner::state_lock` so readers never observe a
/// half-constructed memtable/SSTable.
#[derive(Clone)]
pub struct LsmStorageState {
    pub memtable: Arc<MemTable>,
    /// Rotated-out memtables awaiting flush, newest first. At most one in
    /// practice: `put` blocks on `flush_cond` rather than letting a second
    /// one accumulate.
    pub imm_memtables: Vec<Arc<MemTable>>,
    /// Leveled mode: L0, overlap-permitted, newest id first.
    /// Tiered mode: unused (every run lives in `levels`).
    pub l0_sstables: Vec<usize>,
    /// Leveled mode: `(level, sstable_ids)` for levels 1..=default_levels,
    /// ids within a level sorted by first key (disjoint ranges).
    /// Tiered mode: `(tier_generation, sstable_ids)` for every run, newest
    /// tier first. The vector is kept newest-first by construction (flush
    /// inserts at the front; the oldest-two compaction result is pushed at
    /// the back), and `tier_generation` is a counter independent of
    /// sstable ids — assigned increasing at flush time, and inherited as
    /// the minimum of its inputs' generations for a merged tier, so a
    /// compacted run of old data keeps sorting as the oldest rather than
    /// jumping to the front because its output SSTable got a fresh id.
    pub levels: Vec<(usize, Vec<usize>)>,
    pub sstables: HashMap<usize, Arc<SsTable>>,
}

impl LsmStorageState {
    fn empty(options: &ObLsmOptions) -> Self {
        let levels = match options.compaction_type {
            CompactionType::Leveled => (1..=options.default_levels).map(|l| (l, Vec::new())).collect(),
            CompactionType::Tiered => Vec::new(),
        };
        Self {
            memtable: Arc::new(MemTable::create(0)),
            imm_memtables: Vec::new(),
            l0_sstables: Vec::new(),
            levels,
            sstables: HashMap::new(),
        }
    }
}

fn key_within(user_key: &[u8], table: &SsTable) -> bool {
    table.first_key().key_ref() <= user_key && user_key <= table.last_key().key_ref()
}

fn sort_ids_by_first_key(ids: &mut [usize], sstables: &HashMap<usize, Arc<SsTable>>) {
    ids.sort_by(|a, b| sstables[a].first_key().cmp(sstables[b].first_key()));
}

/// Converts a user-key scan bound into the internal-key bound the memtable
/// skiplist or an SSTable iterator should start at. Because internal keys
/// tie-break on seq descending, the lower bound of an `Included(k)` range
/// must start at `(k, u64::MAX)` (the smallest internal key for that user
/// key) to pick up every version of `k`; symmetric reasoning gives the
/// other three cases.
fn lower_bound_key(lower: &Bound<Vec<u8>>) -> Bound<KeySlice> {
    match lower {
        Bound::Included(k) => Bound::Included(KeySlice::from_slice(k, u64::MAX)),
        Bound::Excluded(k) => Bound::Excluded(KeySlice::from_slice(k, 0)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn upper_bound_key(upper: &Bound<Vec<u8>>) -> Bound<KeySlice> {
    match upper {
        Bound::Included(k) => Bound::Included(KeySlice::from_slice(k, 0)),
        Bound::Excluded(k) => Bound::Excluded(KeySlice::from_slice(k, u64::MAX)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn table_overlaps(table: &SsTable, lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    let below_lower = match lower {
        Bound::Included(k) => table.last_key().key_ref() < k.as_slice(),
        Bound::Excluded(k) => table.last_key().key_ref() <= k.as_slice(),
        Bound::Unbounded => false,
    };
    let above_upper = match upper {
        Bound::Included(k) => table.first_key().key_ref() > k.as_slice(),
        Bound::Excluded(k) => table.first_key().key_ref() >= k.as_slice(),
        Bound::Unbounded => false,
    };
    !below_lower && !above_upper
}

/// Applies a finished [`CompactionTask`]'s effect to `state` in place: drops
/// the merged/compacted input ids and installs the freshly built outputs at
/// the task's output level/tier.
fn apply_compaction_result(state: &mut LsmStorageState, task: &CompactionTask, new_ids: &[usize]) {
    match task {
        CompactionTask::Tiered { tiers } => {
            let merged: HashSet<usize> = tiers.iter().map(|(gen, _)| *gen).collect();
            state.levels.retain(|(gen, _)| !merged.contains(gen));
            if !new_ids.is_empty() {
                // The merged tier holds only data from the oldest two tiers
                // (the picker always takes from the back), so it must stay
                // at the back too: its generation is the minimum of its
                // inputs', which is already older than every surviving tier.
                let generation = tiers.iter().map(|(gen, _)| *gen).min().unwrap_or(0);
                state.levels.push((generation, new_ids.to_vec()));
            }
        }
        CompactionTask::Leveled {
            upper_level,
            upper_sst_ids,
            lower_level,
            lower_sst_ids,
        } => {
            let removed: HashSet<usize> = upper_sst_ids.iter().chain(lower_sst_ids.iter()).copied().collect();
            match upper_level {
                None => state.l0_sstables.retain(|id| !removed.contains(id)),
                Some(lvl) => {
                    if let Some((_, ids)) = state.levels.iter_mut().find(|(l, _)| l == lvl) {
                        ids.retain(|id| !removed.contains(id));
                    }
                }
            }
            if let Some(pos) = state.levels.iter().position(|(l, _)| l == lower_level) {
                let mut ids = std::mem::take(&mut state.levels[pos].1);
                ids.retain(|id| !removed.contains(id));
                ids.extend_from_slice(new_ids);
                sort_ids_by_first_key(&mut ids, &state.sstables);
                state.levels[pos].1 = ids;
            }
        }
    }
}

enum BgMsg {
    Flush,
    Shutdown,
}

fn background_loop(inner: Arc<LsmStorageInner>, rx: crossbeam::channel::Receiver<BgMsg>) {
    for msg in rx {
        match msg {
            BgMsg::Shutdown => break,
            BgMsg::Flush => {
                loop {
                    match inner.flush_next_imm_memtable() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "background flush failed, will retry on next trigger");
                            break;
                        }
                    }
                }
                loop {
                    match inner.trigger_compaction() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "background compaction failed, will retry on next trigger");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// The engine's private state and synchronization, wrapped by the public
/// [`ObLsm`] handle.
pub struct LsmStorageInner {
    pub(crate) state: RwLock<Arc<LsmStorageState>>,
    /// The engine mutex: serializes writers (seq assignment must stay in
    /// lockstep with memtable insertion order) and guards
    /// `imm_memtables`/level mutation. Also the mutex `flush_cond` waits on.
    state_lock: Mutex<()>,
    /// Signaled once an immutable memtable is consumed by a flush, waking
    /// any writer backed up waiting for flush backpressure to clear.
    flush_cond: Condvar,
    /// Serializes flush invocations (the background thread and a test's
    /// direct `force_flush` call might otherwise race to drain the same
    /// immutable memtable).
    flush_lock: Mutex<()>,
    /// Serializes compaction invocations: compaction is single-threaded, one
    /// running compaction at a time.
    compaction_lock: Mutex<()>,
    path: PathBuf,
    block_cache: Arc<BlockCache>,
    next_sst_id: AtomicUsize,
    next_seq: AtomicU64,
    /// Tiered mode only: assigns each freshly flushed tier a generation
    /// strictly newer than every tier alive so far, independent of
    /// sstable-id allocation (see `LsmStorageState::levels`'s doc comment).
    next_tier_generation: AtomicUsize,
    options: ObLsmOptions,
    compaction_controller: CompactionController,
    manifest: Manifest,
    bg_tx: Sender<BgMsg>,
}

impl LsmStorageInner {
    fn path_of_sst(&self, id: usize) -> PathBuf {
        self.path.join(format!("{id}.sst"))
    }

    fn current_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
    }

    fn resolve_seq(&self, read_options: ObLsmReadOptions) -> u64 {
        if read_options.seq == CURRENT_SEQ {
            self.current_seq()
        } else {
            read_options.seq as u64
        }
    }

    // ---- recovery / open -------------------------------------------------

    fn open(path: impl AsRef<Path>, options: ObLsmOptions) -> Result<(Arc<Self>, std::thread::JoinHandle<()>)> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(Error::IoWrite)?;
        let block_cache = Arc::new(BlockCache::new(1 << 20));
        let compaction_controller = CompactionController::new(&options);

        let (manifest, state, next_sst_id, next_seq, next_tier_generation) = match read_current(&path)? {
            None => Self::init_fresh(&path, &options)?,
            Some(id) => Self::recover(&path, id, &options, &block_cache)?,
        };

        let (bg_tx, bg_rx) = crossbeam::channel::unbounded();
        let inner = Arc::new(Self {
            state: RwLock::new(Arc::new(state)),
            state_lock: Mutex::new(()),
            flush_cond: Condvar::new(),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            path,
            block_cache,
            next_sst_id: AtomicUsize::new(next_sst_id),
            next_seq: AtomicU64::new(next_seq),
            next_tier_generation: AtomicUsize::new(next_tier_generation),
            options,
            compaction_controller,
            manifest,
            bg_tx,
        });

        let bg_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("oblsm-background".into())
            .spawn(move || background_loop(bg_inner, bg_rx))
            .expect("failed to spawn background executor thread");

        Ok((inner, handle))
    }

    fn init_fresh(path: &Path, options: &ObLsmOptions) -> Result<(Manifest, LsmStorageState, usize, u64, usize)> {
        tracing::info!(?path, "initializing a new oblsm database");
        let manifest = Manifest::create(manifest_path(path, 0))?;
        manifest.add_record_when_init(ManifestRecord::NewMemtable { memtable_id: 0 })?;
        write_current(path, 0)?;

        let memtable = MemTable::create_with_wal(0, wal_path(path, 0), options.force_sync_new_log)?;
        let mut state = LsmStorageState::empty(options);
        state.memtable = Arc::new(memtable);
        Ok((manifest, state, 1, 0, 0))
    }

    fn recover(
        path: &Path,
        manifest_id: usize,
        options: &ObLsmOptions,
        block_cache: &Arc<BlockCache>,
    ) -> Result<(Manifest, LsmStorageState, usize, u64, usize)> {
        tracing::info!(?path, manifest_id, "recovering oblsm database");
        let (_, records) = Manifest::recover(manifest_path(path, manifest_id))?;

        let mut sstable_infos: Vec<SsTableInfo> = Vec::new();
        let mut next_sstable_id = 1usize;
        let mut next_seq = 0u64;
        let mut compaction_type = options.compaction_type;
        let mut last_memtable_id = 0usize;

        for record in records {
            match record {
                ManifestRecord::Snapshot {
                    sstables,
                    next_sstable_id: nsi,
                    next_seq: ns,
                    compaction_type: ct,
                } => {
                    sstable_infos = sstables;
                    next_sstable_id = nsi;
                    next_seq = ns;
                    compaction_type = ct;
                }
                ManifestRecord::NewMemtable { memtable_id } => {
                    last_memtable_id = memtable_id;
                }
                ManifestRecord::Compaction {
                    added,
                    removed,
                    next_sstable_id: nsi,
                    seq,
                    ..
                } => {
                    sstable_infos.retain(|info| !removed.contains(&info.sstable_id));
                    sstable_infos.extend(added);
                    next_sstable_id = nsi;
                    next_seq = next_seq.max(seq);
                }
            }
        }

        let mut sstables = HashMap::new();
        for info in &sstable_infos {
            let file = FileObject::open(&path.join(format!("{}.sst", info.sstable_id)))?;
            let table = Arc::new(SsTable::open(info.sstable_id, Some(block_cache.clone()), file)?);
            sstables.insert(info.sstable_id, table);
        }

        let mut next_tier_generation = 0usize;
        let (l0_sstables, levels) = match compaction_type {
            CompactionType::Leveled => {
                let mut l0 = Vec::new();
                let mut levels: Vec<(usize, Vec<usize>)> =
                    (1..=options.default_levels).map(|l| (l, Vec::new())).collect();
                for info in &sstable_infos {
                    if info.level == 0 {
                        l0.push(info.sstable_id);
                    } else if let Some((_, ids)) = levels.iter_mut().find(|(l, _)| *l == info.level) {
                        ids.push(info.sstable_id);
                    }
                }
                l0.sort_by(|a, b| b.cmp(a));
                for (_, ids) in levels.iter_mut() {
                    sort_ids_by_first_key(ids, &sstables);
                }
                (l0, levels)
            }
            CompactionType::Tiered => {
                let mut tiers: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
                for info in &sstable_infos {
                    tiers.entry(info.level).or_default().push(info.sstable_id);
                }
                // `info.level` doubles as the tier's generation here; resume
                // the counter strictly past the newest one recovered so a
                // post-recovery flush is never mistaken for an older tier.
                next_tier_generation = tiers.keys().next_back().map_or(0, |g| g + 1);
                (Vec::new(), tiers.into_iter().rev().collect())
            }
        };

        let wal = wal_path(path, last_memtable_id);
        let (memtable, max_seq) = if wal.exists() {
            MemTable::recover_from_wal(last_memtable_id, &wal, options.force_sync_new_log)?
        } else {
            (MemTable::create_with_wal(last_memtable_id, &wal, options.force_sync_new_log)?, 0)
        };
        next_seq = next_seq.max(max_seq + 1);
        next_sstable_id = next_sstable_id.max(last_memtable_id + 1);

        let state = LsmStorageState {
            memtable: Arc::new(memtable),
            imm_memtables: Vec::new(),
            l0_sstables,
            levels,
            sstables,
        };

        // Compact the manifest log itself: rewrite a fresh Snapshot + the
        // replayed memtable's NewMemtable record into a new manifest file,
        // then atomically flip CURRENT.
        let fresh_id = manifest_id + 1;
        let fresh_manifest = Manifest::create(manifest_path(path, fresh_id))?;
        let snapshot_infos: Vec<SsTableInfo> = state
            .l0_sstables
            .iter()
            .map(|id| SsTableInfo { sstable_id: *id, level: 0 })
            .chain(
                state
                    .levels
                    .iter()
                    .flat_map(|(lvl, ids)| ids.iter().map(move |id| SsTableInfo { sstable_id: *id, level: *lvl })),
            )
            .collect();
        fresh_manifest.add_record_when_init(ManifestRecord::Snapshot {
            sstables: snapshot_infos,
            next_sstable_id,
            next_seq,
            compaction_type,
        })?;
        fresh_manifest.add_record_when_init(ManifestRecord::NewMemtable {
            memtable_id: last_memtable_id,
        })?;
        write_current(path, fresh_id)?;
        let _ = std::fs::remove_file(manifest_path(path, manifest_id));

        Ok((fresh_manifest, state, next_sstable_id, next_seq, next_tier_generation))
    }

    // ---- read path --------------------------------------------------------

    pub(crate) fn get_at(&self, key: &[u8], seq: u64) -> Result<Option<Bytes>> {
        let snapshot = self.state.read().clone();

        if let Some(v) = snapshot.memtable.get_visible(key, seq) {
            return Ok(if v.is_empty() { None } else { Some(v) });
        }
        for imm in &snapshot.imm_memtables {
            if let Some(v) = imm.get_visible(key, seq) {
                return Ok(if v.is_empty() { None } else { Some(v) });
            }
        }
        for id in &snapshot.l0_sstables {
            let table = &snapshot.sstables[id];
            if !key_within(key, table) || !table.may_contain(key) {
                continue;
            }
            if let Some(v) = self.get_from_table(table, key, seq)? {
                return Ok(if v.is_empty() { None } else { Some(v) });
            }
        }
        for (_, ids) in &snapshot.levels {
            for id in ids {
                let table = &snapshot.sstables[id];
                if !key_within(key, table) || !table.may_contain(key) {
                    continue;
                }
                if let Some(v) = self.get_from_table(table, key, seq)? {
                    return Ok(if v.is_empty() { None } else { Some(v) });
                }
            }
        }
        Ok(None)
    }

    fn get_from_table(&self, table: &Arc<SsTable>, key: &[u8], seq: u64) -> Result<Option<Bytes>> {
        let iter = SsTableIterator::create_and_seek_to_key(table.clone(), KeySlice::from_slice(key, seq))?;
        if iter.is_valid() && iter.key().key_ref() == key {
            return Ok(Some(Bytes::copy_from_slice(iter.value())));
        }
        Ok(None)
    }

    pub(crate) fn build_bounded_iter(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        seq: u64,
    ) -> Result<BoundedUserIterator> {
        let snapshot = self.state.read().clone();
        let mut children: Vec<Box<EngineChildIterator>> = Vec::new();

        children.push(Box::new(EngineChildIterator::MemTable(
            snapshot.memtable.scan(lower_bound_key(&lower), upper_bound_key(&upper)),
        )));
        for imm in &snapshot.imm_memtables {
            children.push(Box::new(EngineChildIterator::MemTable(
                imm.scan(lower_bound_key(&lower), upper_bound_key(&upper)),
            )));
        }

        let push_table = |table: &Arc<SsTable>, children: &mut Vec<Box<EngineChildIterator>>| -> Result<()> {
            if !table_overlaps(table, &lower, &upper) {
                return Ok(());
            }
            let iter = match &lower {
                Bound::Unbounded => SsTableIterator::create_and_seek_to_first(table.clone())?,
                Bound::Included(k) => {
                    SsTableIterator::create_and_seek_to_key(table.clone(), KeySlice::from_slice(k, u64::MAX))?
                }
                Bound::Excluded(k) => {
                    let mut it = SsTableIterator::create_and_seek_to_key(table.clone(), KeySlice::from_slice(k, 0))?;
                    while it.is_valid() && it.key().key_ref() == k.as_slice() {
                        it.next()?;
                    }
                    it
                }
            };
            children.push(Box::new(EngineChildIterator::SsTable(iter)));
            Ok(())
        };
        for id in &snapshot.l0_sstables {
            push_table(&snapshot.sstables[id], &mut children)?;
        }
        for (_, ids) in &snapshot.levels {
            for id in ids {
                push_table(&snapshot.sstables[id], &mut children)?;
            }
        }

        let merged: MergedIterator = MergeIterator::create(children);
        let user_iter = UserIterator::create(merged, seq)?;
        Ok(BoundedUserIterator::new(user_iter, upper))
    }

    // ---- write path ---------------------------------------------------------

    /// Rotates the active memtable to immutable once it crosses
    /// `memtable_size`, blocking on `flush_cond` first if a previous
    /// rotation is still awaiting flush. Called with `state_lock` held for
    /// the whole write, so `self.state` only changes here.
    fn freeze_if_needed(&self, guard: &mut MutexGuard<'_, ()>) -> Result<()> {
        loop {
            let current = self.state.read().clone();
            if current.memtable.approximate_size() < self.options.memtable_size {
                return Ok(());
            }
            if !current.imm_memtables.is_empty() {
                tracing::debug!("write path waiting: an immutable memtable is still pending flush");
                self.flush_cond.wait(guard);
                continue;
            }

            let new_id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
            let new_memtable =
                MemTable::create_with_wal(new_id, wal_path(&self.path, new_id), self.options.force_sync_new_log)?;
            {
                let mut new_state = (**self.state.read()).clone();
                let old_memtable = std::mem::replace(&mut new_state.memtable, Arc::new(new_memtable));
                new_state.imm_memtables.insert(0, old_memtable);
                *self.state.write() = Arc::new(new_state);
            }
            self.manifest
                .add_record(guard, ManifestRecord::NewMemtable { memtable_id: new_id })?;
            tracing::debug!(new_id, "rotated active memtable to immutable, scheduling flush");
            let _ = self.bg_tx.send(BgMsg::Flush);
            return Ok(());
        }
    }

    fn apply_writes(&self, writes: &[(&[u8], &[u8])]) -> Result<()> {
        let mut guard = self.state_lock.lock();
        for (key, value) in writes {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.state.read().clone();
            snapshot.memtable.put(KeySlice::from_slice(key, seq), value)?;
            self.freeze_if_needed(&mut guard)?;
        }
        Ok(())
    }

    /// Commits a transaction's local write set under a single freshly
    /// assigned seq.
    pub(crate) fn commit_writes(&self, writes: std::collections::BTreeMap<Vec<u8>, Bytes>) -> Result<()> {
        let mut guard = self.state_lock.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.state.read().clone();
        for (key, value) in &writes {
            snapshot.memtable.put(KeySlice::from_slice(key, seq), value)?;
        }
        self.freeze_if_needed(&mut guard)?;
        Ok(())
    }

    // ---- flush / compaction ------------------------------------------------

    pub(crate) fn flush_next_imm_memtable(&self) -> Result<bool> {
        let _flush_guard = self.flush_lock.lock();
        let imm = {
            let _state_guard = self.state_lock.lock();
            match self.state.read().imm_memtables.last() {
                Some(m) => m.clone(),
                None => return Ok(false),
            }
        };

        let mut builder = SsTableBuilder::new(self.options.block_size);
        imm.flush(&mut builder)?;
        let sst_id = imm.id();
        let sst = Arc::new(builder.build(sst_id, Some(self.block_cache.clone()), self.path_of_sst(sst_id))?);
        tracing::info!(sst_id, "flushed immutable memtable to sstable");

        let state_guard = self.state_lock.lock();
        let mut new_state = (**self.state.read()).clone();
        new_state.imm_memtables.pop();
        let level = match self.options.compaction_type {
            CompactionType::Leveled => {
                new_state.l0_sstables.insert(0, sst_id);
                0
            }
            CompactionType::Tiered => {
                let generation = self.next_tier_generation.fetch_add(1, Ordering::SeqCst);
                new_state.levels.insert(0, (generation, vec![sst_id]));
                generation
            }
        };
        new_state.sstables.insert(sst_id, sst);

        let record = ManifestRecord::Compaction {
            compaction_type: self.options.compaction_type,
            added: vec![SsTableInfo { sstable_id: sst_id, level }],
            removed: Vec::new(),
            next_sstable_id: self.next_sst_id.load(Ordering::SeqCst),
            seq: self.next_seq.load(Ordering::SeqCst),
        };
        self.manifest.add_record(&state_guard, record)?;
        *self.state.write() = Arc::new(new_state);
        self.flush_cond.notify_all();
        drop(state_guard);

        // The flushed memtable's writes are now durable in the sstable (and
        // the manifest record above); its WAL is no longer needed to
        // recover them.
        let wal_file = wal_path(&self.path, imm.id());
        if let Err(e) = std::fs::remove_file(&wal_file) {
            tracing::warn!(?wal_file, error = %e, "failed to remove flushed memtable's wal");
        }
        Ok(true)
    }

    /// Builds a merging iterator over one compaction task's inputs and
    /// streams it into fresh SSTables, starting a new one whenever the
    /// current output would exceed `table_size`. Duplicate user keys
    /// collapse naturally: the merge presents the newest version of each key
    /// first, so only the first occurrence is kept.
    fn compact_generate_sst(
        &self,
        task: &CompactionTask,
        snapshot: &LsmStorageState,
        compacts_to_bottom: bool,
    ) -> Result<Vec<(usize, Arc<SsTable>)>> {
        let input_ids = task.all_input_sst_ids();
        let mut children: Vec<Box<EngineChildIterator>> = Vec::with_capacity(input_ids.len());
        for id in &input_ids {
            let table = snapshot.sstables[id].clone();
            children.push(Box::new(EngineChildIterator::SsTable(
                SsTableIterator::create_and_seek_to_first(table)?,
            )));
        }
        let mut merged: MergedIterator = MergeIterator::create(children);

        let mut outputs = Vec::new();
        let mut builder = SsTableBuilder::new(self.options.block_size);
        let mut last_key: Option<Vec<u8>> = None;

        while merged.is_valid() {
            let key = merged.key();
            let is_new_key = last_key.as_deref() != Some(key.key_ref());
            if is_new_key {
                last_key = Some(key.key_ref().to_vec());
                let is_tombstone = merged.value().is_empty();
                if !(compacts_to_bottom && is_tombstone) {
                    builder.add(key, merged.value())?;
                    if builder.estimate_size() >= self.options.table_size {
                        let id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
                        let finished = std::mem::replace(&mut builder, SsTableBuilder::new(self.options.block_size));
                        let sst = finished.build(id, Some(self.block_cache.clone()), self.path_of_sst(id))?;
                        outputs.push((id, Arc::new(sst)));
                    }
                }
            }
            merged.next()?;
        }
        if builder.estimate_size() > 0 {
            let id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
            let sst = builder.build(id, Some(self.block_cache.clone()), self.path_of_sst(id))?;
            outputs.push((id, Arc::new(sst)));
        }
        Ok(outputs)
    }

    pub(crate) fn trigger_compaction(&self) -> Result<bool> {
        let _compaction_guard = self.compaction_lock.lock();
        let snapshot = self.state.read().clone();
        let table_sizes = |id: usize| snapshot.sstables.get(&id).map(|t| t.table_size()).unwrap_or(0);
        let Some(task) = self.compaction_controller.generate_compaction_task(&snapshot, table_sizes) else {
            return Ok(false);
        };

        let compacts_to_bottom = task.compacts_to_bottom(&snapshot);
        let outputs = self.compact_generate_sst(&task, &snapshot, compacts_to_bottom)?;
        let new_ids: Vec<usize> = outputs.iter().map(|(id, _)| *id).collect();
        tracing::info!(inputs = task.all_input_sst_ids().len(), outputs = new_ids.len(), "compaction finished");

        let removed_ids = task.all_input_sst_ids();
        let state_guard = self.state_lock.lock();
        let mut new_state = (**self.state.read()).clone();
        for (id, table) in outputs {
            new_state.sstables.insert(id, table);
        }
        apply_compaction_result(&mut new_state, &task, &new_ids);
        let removed_tables: Vec<Arc<SsTable>> = removed_ids.iter().filter_map(|id| new_state.sstables.remove(id)).collect();

        let added = match &task {
            CompactionTask::Tiered { tiers } => {
                let generation = tiers.iter().map(|(gen, _)| *gen).min().unwrap_or(0);
                new_ids.iter().map(|id| SsTableInfo { sstable_id: *id, level: generation }).collect()
            }
            CompactionTask::Leveled { lower_level, .. } => new_ids
                .iter()
                .map(|id| SsTableInfo { sstable_id: *id, level: *lower_level })
                .collect(),
        };
        let record = ManifestRecord::Compaction {
            compaction_type: self.options.compaction_type,
            added,
            removed: removed_ids,
            next_sstable_id: self.next_sst_id.load(Ordering::SeqCst),
            seq: self.next_seq.load(Ordering::SeqCst),
        };
        self.manifest.add_record(&state_guard, record)?;
        *self.state.write() = Arc::new(new_state);
        drop(state_guard);

        for table in removed_tables {
            let path = self.path_of_sst(table.sst_id());
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(?path, error = %e, "failed to remove superseded sstable");
            }
        }
        Ok(true)
    }

}

/// The public handle to an open database, wrapping [`LsmStorageInner`] plus
/// ownership of the single background executor thread.
pub struct ObLsm {
    pub(crate) inner: Arc<LsmStorageInner>,
    bg_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ObLsm {
    pub fn open(path: impl AsRef<Path>, options: ObLsmOptions) -> Result<Self> {
        let (inner, bg_handle) = LsmStorageInner::open(path, options)?;
        Ok(Self {
            inner,
            bg_handle: Mutex::new(Some(bg_handle)),
        })
    }

    /// Signals the background executor to stop and joins it, then fsyncs
    /// the active WAL.
    pub fn close(&self) -> Result<()> {
        let _ = self.inner.bg_tx.send(BgMsg::Shutdown);
        if let Some(handle) = self.bg_handle.lock().take() {
            let _ = handle.join();
        }
        self.inner.state.read().memtable.sync_wal()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        self.inner.apply_writes(&[(key, value)])
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.inner.apply_writes(&[(key, b"")])
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.get_at(key, self.inner.current_seq())
    }

    /// Applies every pair as its own write, taking the engine lock once for
    /// the whole batch; each pair still gets its own seq, matching the
    /// single-`put` write path.
    pub fn batch_put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, pairs: &[(K, V)]) -> Result<()> {
        let borrowed: Vec<(&[u8], &[u8])> = pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
        self.inner.apply_writes(&borrowed)
    }

    pub fn new_iterator(&self, read_options: ObLsmReadOptions) -> Result<ObLsmIterator> {
        self.scan(Bound::Unbounded, Bound::Unbounded, read_options)
    }

    pub fn scan(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, read_options: ObLsmReadOptions) -> Result<ObLsmIterator> {
        let seq = self.inner.resolve_seq(read_options);
        let cursor = self.inner.build_bounded_iter(lower.clone(), upper.clone(), seq)?;
        Ok(ObLsmIterator {
            inner: self.inner.clone(),
            seq,
            upper,
            cursor,
        })
    }

    pub fn begin_transaction(&self) -> Transaction {
        Transaction::new(self.inner.clone(), self.inner.current_seq())
    }

    /// Drains pending flush and compaction work synchronously on the
    /// calling thread, letting tests wait for background work to quiesce
    /// deterministically.
    pub fn force_flush(&self) -> Result<()> {
        while self.inner.flush_next_imm_memtable()? {}
        while self.inner.trigger_compaction()? {}
        Ok(())
    }
}

/// The public range-scan iterator, exposing
/// `valid/seek_to_first/seek_to_last/seek/next/key/value`. Because the
/// underlying merge tree is rebuilt from the live engine state rather than
/// supporting in-place re-seeks, `seek*` reconstructs the cursor.
pub struct ObLsmIterator {
    inner: Arc<LsmStorageInner>,
    seq: u64,
    upper: Bound<Vec<u8>>,
    cursor: BoundedUserIterator,
}

impl ObLsmIterator {
    pub fn valid(&self) -> bool {
        self.cursor.is_valid()
    }

    pub fn key(&self) -> &[u8] {
        self.cursor.key()
    }

    pub fn value(&self) -> &[u8] {
        self.cursor.value()
    }

    pub fn next(&mut self) -> Result<()> {
        self.cursor.next()
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.cursor = self.inner.build_bounded_iter(Bound::Unbounded, self.upper.clone(), self.seq)?;
        Ok(())
    }

    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.cursor = self
            .inner
            .build_bounded_iter(Bound::Included(key.to_vec()), self.upper.clone(), self.seq)?;
        Ok(())
    }

    /// Reverse iteration isn't supported by the underlying merge cursor;
    /// kept unimplemented rather than guessed at.
    pub fn seek_to_last(&mut self) -> Result<()> {
        Err(Error::Unimplemented("ObLsmIterator::seek_to_last"))
    }
}
