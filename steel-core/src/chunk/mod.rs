//! The chunk lifecycle: tickets, holders, staged generation, light, saving and unloading.
//!
//! Game logic talks to [`chunk_cache::ChunkCache`]. Everything below it is driven from the
//! thread that created the cache, with generation and light work running on a worker pool.

/// Chunk data in its proto and full forms.
pub mod chunk_access;
/// The synchronous chunk access used by game logic.
pub mod chunk_cache;
/// Completion cells the pipeline chains its work on.
pub mod chunk_future;
/// Tasks walking a chunk and its neighbourhood up the generation stages.
pub mod chunk_generation_task;
/// The generator contract.
pub mod chunk_generator;
/// Per-position state: ticket levels, tiers and pending changes.
pub mod chunk_holder;
/// Ticket level arithmetic.
pub mod chunk_level;
/// The table of chunk holders.
pub mod chunk_map;
/// Stage dependencies for generating and loading.
pub mod chunk_pyramid;
/// Results and errors of chunk requests.
pub mod chunk_result;
/// The work done for each generation stage.
pub mod chunk_status_tasks;
/// Prioritised, per-chunk task dispatch.
pub mod chunk_task_dispatcher;
/// The priority queue behind the dispatcher.
pub mod chunk_task_queue;
/// Ticket collection and level propagation.
pub mod chunk_ticket_manager;
/// The incremental level propagation engine.
pub mod chunk_tracker;
/// Generates superflat terrain.
pub mod flat_chunk_generator;
/// Per-stage futures of a chunk.
pub mod generation_chunk_holder;
/// Callbacks into the rest of the server.
pub mod hooks;
/// Finished chunks.
pub mod level_chunk;
/// Light propagation.
pub mod light_engine;
/// The main thread mailbox.
pub mod main_thread_executor;
/// Chunks still being generated.
pub mod proto_chunk;
/// Chunk sections and world height.
pub mod section;
/// Ticket types.
pub mod ticket;
/// Generates nothing.
pub mod void_chunk_generator;
/// Worker threads.
pub mod worker_pool;
/// Everything generation steps need.
pub mod world_gen_context;
