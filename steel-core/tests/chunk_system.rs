//! Drives a complete chunk cache over in-memory storage.
use std::{
    collections::HashSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use steel_core::{
    chunk::{
        chunk_access::{ChunkAccess, ChunkStatus, FullChunkStatus},
        chunk_cache::ChunkCache,
        chunk_generator::{ChunkGenerator, CustomChunkGenerator},
        chunk_level::ChunkLevel,
        chunk_map::CachedChunkType,
        chunk_result::ChunkLoadError,
        flat_chunk_generator::FlatChunkGenerator,
        hooks::{ChunkFailureReporter, ChunkMapHooks, ChunkStatusListener},
        proto_chunk::ProtoChunk,
        section::{LevelHeight, Sections},
        ticket::TicketType,
        world_gen_context::ChunkGeneratorType,
    },
    chunk_saver::{
        SerializedChunk,
        ram_only::RamOnlyStorage,
        storage::{ChunkIo, ChunkStorage},
    },
    config::ChunkSystemConfig,
};
use steel_utils::{BlockStateId, ChunkPos, locks::SyncMutex};
use tokio::runtime::{Builder, Runtime};

const HEIGHT: LevelHeight = LevelHeight::new(0, 4);

fn runtime() -> Arc<Runtime> {
    Arc::new(
        Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime builds"),
    )
}

fn config() -> ChunkSystemConfig {
    ChunkSystemConfig {
        worker_threads: 2,
        ..ChunkSystemConfig::default()
    }
}

fn flat() -> FlatChunkGenerator {
    FlatChunkGenerator::classic(BlockStateId(1), BlockStateId(2), BlockStateId(3))
}

/// RAM storage the test keeps a handle to.
struct SharedStorage(RamOnlyStorage);

impl ChunkIo for SharedStorage {
    fn read(&self, pos: ChunkPos) -> BoxFuture<'_, io::Result<Option<SerializedChunk>>> {
        Box::pin(async move { Ok(self.0.read(pos).await) })
    }

    fn write(&self, pos: ChunkPos, chunk: SerializedChunk) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.0.write(pos, chunk).await;
            Ok(())
        })
    }

    fn flush(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct BrokenStorage;

impl ChunkIo for BrokenStorage {
    fn read(&self, _pos: ChunkPos) -> BoxFuture<'_, io::Result<Option<SerializedChunk>>> {
        Box::pin(async { Err(io::Error::other("disk on fire")) })
    }

    fn write(&self, _pos: ChunkPos, _chunk: SerializedChunk) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn flush(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
    generated: SyncMutex<Vec<ChunkPos>>,
}

impl ChunkGenerator for CountingGenerator {
    fn fill_from_noise(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.generated.lock().push(chunk.pos());
        flat().fill_from_noise(chunk)
    }
}

#[derive(Default)]
struct Recorder {
    statuses: SyncMutex<Vec<(ChunkPos, FullChunkStatus)>>,
    unloaded: SyncMutex<Vec<ChunkPos>>,
    load_failures: AtomicUsize,
}

impl ChunkStatusListener for Recorder {
    fn on_full_chunk_status_change(&self, pos: ChunkPos, status: FullChunkStatus) {
        self.statuses.lock().push((pos, status));
    }

    fn on_chunk_unloaded(&self, pos: ChunkPos) {
        self.unloaded.lock().push(pos);
    }
}

impl ChunkFailureReporter for Recorder {
    fn report_load_failure(&self, _pos: ChunkPos, _error: &io::Error) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }
}

fn hooks(recorder: &Arc<Recorder>) -> ChunkMapHooks {
    ChunkMapHooks {
        status_listener: recorder.clone(),
        failure_reporter: recorder.clone(),
        ..ChunkMapHooks::default()
    }
}

fn cache(generator: ChunkGeneratorType, storage: ChunkStorage, recorder: &Arc<Recorder>) -> ChunkCache {
    ChunkCache::new(config(), generator, storage, runtime(), hooks(recorder), HEIGHT)
        .expect("chunk cache builds")
}

fn tick_until(cache: &ChunkCache, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "chunk system did not settle in time");
        cache.tick(&|| true);
        if !cache.poll_task() {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn stored(pos: ChunkPos, status: ChunkStatus, block: BlockStateId) -> SerializedChunk {
    let chunk = ChunkAccess::Proto(ProtoChunk::new(Sections::new_empty(HEIGHT.section_count), pos));
    chunk.set_relative_block(0, 0, 0, block);
    SerializedChunk {
        status,
        light_correct: true,
        ..SerializedChunk::from_chunk(&chunk)
    }
}

#[test]
fn test_mandatory_request_generates_a_full_chunk() {
    let recorder = Arc::new(Recorder::default());
    let storage = ChunkStorage::RamOnly(RamOnlyStorage::empty_world());
    let cache = cache(ChunkGeneratorType::Flat(flat()), storage, &recorder);
    let pos = ChunkPos::new(0, 0);

    let chunk = cache
        .get_chunk(pos, ChunkStatus::Full, true)
        .expect("the chunk is generated");
    assert!(chunk.is_full());
    assert_eq!(chunk.get_relative_block(0, 0, 0), Some(BlockStateId(1)));
    assert_eq!(chunk.get_relative_block(5, 3, 5), Some(BlockStateId(3)));

    tick_until(&cache, || {
        cache.has_chunk(pos)
            && recorder
                .statuses
                .lock()
                .contains(&(pos, FullChunkStatus::Full))
    });
    assert!(cache.get_chunk_now(pos).is_some_and(|now| Arc::ptr_eq(&now, &chunk)));
}

#[test]
fn test_request_from_another_thread_is_served_by_the_main_thread() {
    let recorder = Arc::new(Recorder::default());
    let storage = ChunkStorage::RamOnly(RamOnlyStorage::empty_world());
    let cache = cache(ChunkGeneratorType::Flat(flat()), storage, &recorder);
    let pos = ChunkPos::new(3, -2);

    let chunk = thread::scope(|scope| {
        let request = scope.spawn(|| cache.get_chunk(pos, ChunkStatus::Full, true));
        tick_until(&cache, || request.is_finished());
        request.join().expect("request thread does not panic")
    })
    .expect("the chunk is generated");
    assert_eq!(chunk.pos(), pos);
    assert!(chunk.is_full());
}

#[test]
fn test_optional_request_for_unloaded_chunk_is_empty() {
    let recorder = Arc::new(Recorder::default());
    let storage = ChunkStorage::RamOnly(RamOnlyStorage::empty_world());
    let cache = cache(ChunkGeneratorType::Flat(flat()), storage, &recorder);
    let pos = ChunkPos::new(100, 100);

    assert_eq!(
        cache.get_chunk(pos, ChunkStatus::Full, false).err(),
        Some(ChunkLoadError::Unloaded)
    );
    assert!(!cache.has_chunk(pos));
    assert_eq!(cache.loaded_chunk_count(), 0);
}

#[test]
fn test_stored_chunks_load_without_generating() {
    let recorder = Arc::new(Recorder::default());
    let center = ChunkPos::new(0, 0);
    let mut chunks = vec![stored(center, ChunkStatus::Full, BlockStateId(7))];
    for dx in -1..=1 {
        for dz in -1..=1 {
            if dx != 0 || dz != 0 {
                chunks.push(stored(
                    ChunkPos::new(dx, dz),
                    ChunkStatus::InitializeLight,
                    BlockStateId(8),
                ));
            }
        }
    }
    let generator = Arc::new(CountingGenerator::default());
    let cache = cache(
        ChunkGeneratorType::Custom(CustomChunkGenerator(generator.clone())),
        ChunkStorage::RamOnly(RamOnlyStorage::preloaded(chunks)),
        &recorder,
    );

    let chunk = cache
        .get_chunk(center, ChunkStatus::Full, true)
        .expect("the stored chunk loads");
    assert!(chunk.is_full());
    assert_eq!(chunk.get_relative_block(0, 0, 0), Some(BlockStateId(7)));
    assert_eq!(generator.calls.load(Ordering::Relaxed), 0);
    assert_eq!(
        cache.chunk_map().cached_chunk_type(center),
        Some(CachedChunkType::Full)
    );
}

#[test]
fn test_load_failure_degrades_to_an_empty_chunk() {
    let recorder = Arc::new(Recorder::default());
    let cache = cache(
        ChunkGeneratorType::Flat(flat()),
        ChunkStorage::Custom(Arc::new(BrokenStorage)),
        &recorder,
    );
    let pos = ChunkPos::new(1, 1);

    let chunk = cache
        .get_chunk(pos, ChunkStatus::Empty, true)
        .expect("an empty chunk replaces the unreadable one");
    assert_eq!(chunk.persisted_status(), ChunkStatus::Empty);
    assert_eq!(chunk.get_relative_block(0, 0, 0), Some(BlockStateId(0)));
    assert!(recorder.load_failures.load(Ordering::Relaxed) >= 1);
    assert_eq!(
        cache.chunk_map().cached_chunk_type(pos),
        Some(CachedChunkType::Replaceable)
    );
}

#[test]
fn test_region_ticket_levels_and_ticking_range() {
    let recorder = Arc::new(Recorder::default());
    let storage = ChunkStorage::RamOnly(RamOnlyStorage::empty_world());
    let cache = cache(ChunkGeneratorType::Flat(flat()), storage, &recorder);
    let center = ChunkPos::new(0, 0);
    let level_at = |x, z| {
        cache
            .chunk_map()
            .with_distance_manager(|manager| manager.ticket_level(ChunkPos::new(x, z)))
    };

    cache.add_region_ticket(TicketType::Start, center, 2, 0);
    cache.chunk_map().run_distance_manager_updates();
    assert_eq!(level_at(0, 0), 31);
    assert_eq!(level_at(2, 0), 33);
    assert_eq!(level_at(-3, 3), 34);
    assert_eq!(level_at(13, 0), 44);
    assert!(cache.is_position_ticking(center));
    assert!(cache.is_position_entity_ticking(center));
    assert!(!cache.is_position_ticking(ChunkPos::new(10, 0)));
    assert_eq!(cache.chunk_map().loaded_chunk_count(), 27 * 27);

    let mut dump = Vec::new();
    cache.dump_chunks(&mut dump).expect("dumping to memory works");
    let dump = String::from_utf8(dump).expect("dump is utf-8");
    let mut lines = dump.lines();
    assert!(lines.next().is_some_and(|header| header.starts_with("x,z,level,in_memory")));
    assert!(dump.lines().any(|line| line.starts_with("0,0,31,")));

    cache.remove_region_ticket(TicketType::Start, center, 2, 0);
    cache.chunk_map().run_distance_manager_updates();
    assert_eq!(level_at(0, 0), ChunkLevel::UNLOADED_LEVEL);
    assert!(!cache.is_position_ticking(center));
}

#[test]
fn test_expired_request_ticket_saves_and_unloads() {
    let recorder = Arc::new(Recorder::default());
    let shared = Arc::new(SharedStorage(RamOnlyStorage::empty_world()));
    let cache = cache(
        ChunkGeneratorType::Flat(flat()),
        ChunkStorage::Custom(shared.clone()),
        &recorder,
    );
    let pos = ChunkPos::new(0, 0);

    cache
        .get_chunk(pos, ChunkStatus::Full, true)
        .expect("the chunk is generated");
    tick_until(&cache, || {
        cache.loaded_chunk_count() == 0 && cache.chunk_map().pending_unload_count() == 0
    });
    cache.close(false);

    let saved = shared.0.get(pos).expect("the full chunk was written");
    assert_eq!(saved.status, ChunkStatus::Full);
    assert!(shared.0.get(ChunkPos::new(20, 0)).is_none());
    assert!(recorder.unloaded.lock().contains(&pos));
    assert!(
        recorder
            .statuses
            .lock()
            .contains(&(pos, FullChunkStatus::Inaccessible))
    );
    assert_eq!(
        cache.get_chunk(pos, ChunkStatus::Full, false).err(),
        Some(ChunkLoadError::Unloaded)
    );
}

#[test]
fn test_removing_the_ticket_mid_generation_fails_the_request() {
    let recorder = Arc::new(Recorder::default());
    let storage = ChunkStorage::RamOnly(RamOnlyStorage::empty_world());
    let cache = cache(ChunkGeneratorType::Flat(flat()), storage, &recorder);
    let pos = ChunkPos::new(4, 4);
    let level = ChunkLevel::by_status(ChunkStatus::Full);

    cache.add_ticket(pos, TicketType::Forced, level, 0);
    cache.chunk_map().run_distance_manager_updates();
    let future = cache.get_chunk_future(pos, ChunkStatus::Full, false);
    assert!(!future.is_done());

    // The full step runs on this thread, so nothing can finish before the ticket goes.
    cache.remove_ticket(pos, TicketType::Forced, level, 0);
    cache.chunk_map().run_distance_manager_updates();
    tick_until(&cache, || {
        future.is_done()
            && cache.loaded_chunk_count() == 0
            && cache.chunk_map().pending_unload_count() == 0
    });

    assert_eq!(
        future.get_now().cloned().map(|result| result.err()),
        Some(Some(ChunkLoadError::Unloaded))
    );
    assert!(cache.get_chunk_now(pos).is_none());
    assert_eq!(
        cache.get_chunk(pos, ChunkStatus::Full, false).err(),
        Some(ChunkLoadError::Unloaded)
    );
}

#[test]
fn test_edits_are_written_when_the_chunk_unloads() {
    let recorder = Arc::new(Recorder::default());
    let shared = Arc::new(SharedStorage(RamOnlyStorage::empty_world()));
    let cache = cache(
        ChunkGeneratorType::Flat(flat()),
        ChunkStorage::Custom(shared.clone()),
        &recorder,
    );
    let pos = ChunkPos::new(-2, 5);

    let chunk = cache
        .get_chunk(pos, ChunkStatus::Full, true)
        .expect("the chunk is generated");
    chunk.set_relative_block(1, 1, 1, BlockStateId(99));
    assert!(chunk.is_unsaved());
    drop(chunk);

    tick_until(&cache, || {
        cache.loaded_chunk_count() == 0 && cache.chunk_map().pending_unload_count() == 0
    });
    cache.close(false);

    let saved = shared.0.get(pos).expect("the chunk was written on unload");
    assert_eq!(saved.status, ChunkStatus::Full);
    let restored = saved.into_chunk(HEIGHT);
    assert_eq!(restored.get_relative_block(1, 1, 1), Some(BlockStateId(99)));
    assert_eq!(restored.get_relative_block(0, 0, 0), Some(BlockStateId(1)));
}

#[test]
fn test_concurrent_requests_share_one_generation() {
    const REQUESTS: usize = 8;

    let recorder = Arc::new(Recorder::default());
    let generator = Arc::new(CountingGenerator::default());
    let cache = cache(
        ChunkGeneratorType::Custom(CustomChunkGenerator(generator.clone())),
        ChunkStorage::RamOnly(RamOnlyStorage::empty_world()),
        &recorder,
    );
    let center = ChunkPos::new(7, -7);
    let level = ChunkLevel::by_status(ChunkStatus::Full);
    cache.add_ticket(center, TicketType::Forced, level, 0);

    let chunks: Vec<_> = thread::scope(|scope| {
        let requests: Vec<_> = (0..REQUESTS)
            .map(|_| scope.spawn(|| cache.get_chunk(center, ChunkStatus::Full, true)))
            .collect();
        tick_until(&cache, || requests.iter().all(|request| request.is_finished()));
        requests
            .into_iter()
            .map(|request| {
                request
                    .join()
                    .expect("request thread does not panic")
                    .expect("the chunk is generated")
            })
            .collect()
    });

    let first = &chunks[0];
    assert!(first.is_full());
    assert!(chunks.iter().all(|chunk| Arc::ptr_eq(chunk, first)));

    let generated = generator.generated.lock();
    let unique: HashSet<_> = generated.iter().copied().collect();
    assert_eq!(unique.len(), generated.len(), "a chunk was generated twice");
    assert_eq!(generated.iter().filter(|pos| **pos == center).count(), 1);
    assert_eq!(generator.calls.load(Ordering::Relaxed), generated.len());
}
