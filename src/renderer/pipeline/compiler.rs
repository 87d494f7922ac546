//! Pipeline State Compiler
//!
//! Asynchronous PSO production in three stages:
//!
//! ```text
//!  render thread            psc-stage1-builder        psc-stage2-compiler-N      render thread
//! ┌──────────────┐ builder ┌───────────────────┐ comp. ┌────────────────────┐ flume ┌────────────┐
//! │ add_async... │ ──────▶ │ resolve shader    │ ────▶ │ compile sources,   │ ────▶ │ dispatch() │
//! │              │  queue  │ caches, generate  │ queue │ link program,      │       │ publish    │
//! └──────────────┘         │ source            │       │ create PSO         │       │ into cache │
//!                          └───────────────────┘       └────────────────────┘       └────────────┘
//! ```
//!
//! - **Builder** (one thread): source generation and shader cache dedup, so
//!   template expansion never blocks the render thread.
//! - **Compiler** (pool, default 2 threads): backend compile calls, program
//!   linking and PSO creation.
//! - **Dispatch** (caller's thread, once per frame): drains finished PSOs and
//!   publishes them into their pipeline state caches. This is the only place
//!   a cache entry's PSO changes after creation.
//!
//! A request whose alias shader cache points at a master that is still being
//! compiled blocks on the master's completion signal. The compiler queue is
//! FIFO and a master is registered by the request that compiles it, which was
//! therefore dequeued first; the wait always ends.
//!
//! Failures (build errors, compile errors, link errors) are logged and
//! dispatched as a null PSO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::backend::{
    NUMBER_OF_SHADER_TYPES, PipelineStateDescriptor, PipelineStateHandle, ShaderType, StageShaders,
};
use crate::errors::{PipelineError, Result};
use crate::renderer::pipeline::context::CompilationContext;
use crate::renderer::pipeline::pipeline_id::PipelineStateSignatureId;
use crate::renderer::pipeline::pipeline_key::PipelineState;
use crate::renderer::pipeline::program_cache::ProgramCacheManager;
use crate::renderer::pipeline::shader_builder::ShaderBuilder;
use crate::renderer::pipeline::shader_cache::{ShaderCache, ShaderCacheResolution};
use crate::renderer::pipeline::signature::PipelineStateSignature;
use crate::renderer::settings::PipelineStateCompilerSettings;
use crate::resources::{MaterialBlueprint, MaterialBlueprintResourceManager};
use crate::utils::AssetId;

// ─── Requests ────────────────────────────────────────────────────────────────

/// Work item travelling builder → compiler → dispatch.
pub struct CompilerRequest {
    material_blueprint: Arc<MaterialBlueprint>,
    program_cache_manager: Arc<ProgramCacheManager>,
    signature: PipelineStateSignature,
    pipeline_state: PipelineState,
    generation: u64,

    // Filled by the builder stage
    shader_caches: [Option<Arc<ShaderCache>>; NUMBER_OF_SHADER_TYPES],
    source_codes: [Option<String>; NUMBER_OF_SHADER_TYPES],
    build_error: Option<PipelineError>,
}

impl CompilerRequest {
    /// `generation` is the cache generation of the target pipeline state
    /// cache manager; requests of another generation link no program and
    /// their results are discarded at dispatch.
    #[must_use]
    pub fn new(
        material_blueprint: Arc<MaterialBlueprint>,
        program_cache_manager: Arc<ProgramCacheManager>,
        signature: PipelineStateSignature,
        pipeline_state: PipelineState,
        generation: u64,
    ) -> Self {
        Self {
            material_blueprint,
            program_cache_manager,
            signature,
            pipeline_state,
            generation,
            shader_caches: Default::default(),
            source_codes: Default::default(),
            build_error: None,
        }
    }

    #[must_use]
    pub fn signature(&self) -> &PipelineStateSignature {
        &self.signature
    }

    /// Releases masters this request registered but will never compile.
    fn abandon(&self) {
        for (shader_cache, source_code) in self.shader_caches.iter().zip(&self.source_codes) {
            if let (Some(shader_cache), Some(_)) = (shader_cache, source_code) {
                shader_cache.abandon();
            }
        }
    }
}

/// Result of a compiler request, routed to its cache entry by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledPipelineState {
    pub material_blueprint_id: AssetId,
    pub pipeline_state_signature_id: PipelineStateSignatureId,
    pub generation: u64,
    /// `None` if any step failed.
    pub pipeline_state: Option<PipelineStateHandle>,
}

// ─── Stage Queue ─────────────────────────────────────────────────────────────

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// FIFO queue with a condition variable, one per thread stage.
struct StageQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> StageQueue<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, item: T) {
        self.state.lock().items.push_back(item);
        self.available.notify_one();
    }

    /// Blocks until an item is available. `None` once shut down; queued
    /// items stay queued for the next set of threads.
    fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.available.notify_all();
    }

    fn reset(&self) {
        self.state.lock().shutdown = false;
    }

    fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }
}

// ─── Compiler ────────────────────────────────────────────────────────────────

struct Shared {
    context: Arc<CompilationContext>,
    builder_queue: StageQueue<CompilerRequest>,
    compiler_queue: StageQueue<CompilerRequest>,
    dispatch_sender: flume::Sender<CompiledPipelineState>,
    /// Requests added and not yet dispatched.
    in_flight: AtomicUsize,
    asynchronous: AtomicBool,
}

pub struct PipelineStateCompiler {
    shared: Arc<Shared>,
    dispatch_receiver: flume::Receiver<CompiledPipelineState>,
    builder_thread: Option<JoinHandle<()>>,
    compiler_threads: Vec<JoinHandle<()>>,
    flush_poll_interval: Duration,
    /// Scratch builder of synchronous callers.
    synchronous_builder: Mutex<ShaderBuilder>,
}

impl PipelineStateCompiler {
    pub fn new(
        context: Arc<CompilationContext>,
        settings: &PipelineStateCompilerSettings,
    ) -> Result<Self> {
        let (dispatch_sender, dispatch_receiver) = flume::unbounded();
        let shared = Arc::new(Shared {
            context,
            builder_queue: StageQueue::new(),
            compiler_queue: StageQueue::new(),
            dispatch_sender,
            in_flight: AtomicUsize::new(0),
            asynchronous: AtomicBool::new(settings.asynchronous_compilation),
        });

        let builder_shared = Arc::clone(&shared);
        let builder_thread = std::thread::Builder::new()
            .name("psc-stage1-builder".to_string())
            .spawn(move || builder_stage(&builder_shared))?;

        let mut compiler = Self {
            shared,
            dispatch_receiver,
            builder_thread: Some(builder_thread),
            compiler_threads: Vec::new(),
            flush_poll_interval: Duration::from_millis(settings.flush_poll_interval_ms),
            synchronous_builder: Mutex::new(ShaderBuilder::new()),
        };
        compiler.spawn_compiler_threads(settings.number_of_compiler_threads.max(1))?;
        Ok(compiler)
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<CompilationContext> {
        &self.shared.context
    }

    #[inline]
    #[must_use]
    pub fn is_asynchronous_compilation_enabled(&self) -> bool {
        self.shared.asynchronous.load(Ordering::Acquire)
    }

    /// Disabling flushes every queue before returning, after which all
    /// lookups compile synchronously.
    pub fn set_asynchronous_compilation_enabled(
        &self,
        enabled: bool,
        material_blueprints: &mut MaterialBlueprintResourceManager,
    ) {
        self.shared.asynchronous.store(enabled, Ordering::Release);
        if !enabled {
            self.flush_all_queues(material_blueprints);
        }
    }

    #[inline]
    #[must_use]
    pub fn number_of_compiler_threads(&self) -> usize {
        self.compiler_threads.len()
    }

    /// Replaces the compiler pool: signals shutdown, joins every worker and
    /// spawns `number_of_compiler_threads` (at least 1) new ones. Queued
    /// requests are kept.
    pub fn set_number_of_compiler_threads(&mut self, number_of_compiler_threads: usize) -> Result<()> {
        let number_of_compiler_threads = number_of_compiler_threads.max(1);
        if number_of_compiler_threads == self.compiler_threads.len() {
            return Ok(());
        }

        self.shared.compiler_queue.shutdown();
        for thread in self.compiler_threads.drain(..) {
            if thread.join().is_err() {
                log::error!("Pipeline state compiler thread panicked");
            }
        }
        self.shared.compiler_queue.reset();
        self.spawn_compiler_threads(number_of_compiler_threads)
    }

    fn spawn_compiler_threads(&mut self, count: usize) -> Result<()> {
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let thread = std::thread::Builder::new()
                .name(format!("psc-stage2-compiler-{index}"))
                .spawn(move || compiler_stage(&shared))?;
            self.compiler_threads.push(thread);
        }
        log::info!("Pipeline state compiler running {count} compiler thread(s)");
        Ok(())
    }

    /// Requests added and not yet dispatched.
    #[must_use]
    pub fn number_of_in_flight_requests(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn add_asynchronous_compiler_request(&self, request: CompilerRequest) {
        log::debug!(
            "Queued pipeline state {} of material blueprint '{}'",
            request.signature.pipeline_state_signature_id(),
            request.material_blueprint.name()
        );
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.builder_queue.push(request);
    }

    /// Builds and compiles `request` on the calling thread.
    #[must_use]
    pub fn instant_synchronous_compiler_request(
        &self,
        mut request: CompilerRequest,
    ) -> Option<PipelineStateHandle> {
        {
            let mut builder = self.synchronous_builder.lock();
            build_request(&self.shared.context, &mut builder, &mut request);
        }
        compile_request(&self.shared.context, request).pipeline_state
    }

    /// Publishes every finished PSO into its pipeline state cache. Returns
    /// the number of results processed.
    pub fn dispatch(&self, material_blueprints: &mut MaterialBlueprintResourceManager) -> usize {
        let device = self.shared.context.device();
        let mut count = 0;
        for compiled in self.dispatch_receiver.try_iter() {
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            material_blueprints.publish(device, &compiled);
            count += 1;
        }
        count
    }

    /// Dispatches until no request is in flight.
    pub fn flush_all_queues(&self, material_blueprints: &mut MaterialBlueprintResourceManager) {
        loop {
            self.dispatch(material_blueprints);
            if self.number_of_in_flight_requests() == 0 {
                return;
            }
            std::thread::sleep(self.flush_poll_interval);
        }
    }
}

impl Drop for PipelineStateCompiler {
    fn drop(&mut self) {
        self.shared.builder_queue.shutdown();
        self.shared.compiler_queue.shutdown();
        if let Some(thread) = self.builder_thread.take()
            && thread.join().is_err()
        {
            log::error!("Pipeline state builder thread panicked");
        }
        for thread in self.compiler_threads.drain(..) {
            if thread.join().is_err() {
                log::error!("Pipeline state compiler thread panicked");
            }
        }

        self.shared.builder_queue.drain();
        for request in self.shared.compiler_queue.drain() {
            request.abandon();
        }

        let device = self.shared.context.device();
        for compiled in self.dispatch_receiver.try_iter() {
            if let Some(pipeline_state) = compiled.pipeline_state {
                device.destroy_pipeline_state(pipeline_state);
            }
        }
    }
}

// ─── Stages ──────────────────────────────────────────────────────────────────

fn builder_stage(shared: &Shared) {
    let mut builder = ShaderBuilder::new();
    while let Some(mut request) = shared.builder_queue.pop() {
        build_request(&shared.context, &mut builder, &mut request);
        shared.compiler_queue.push(request);
    }
}

fn compiler_stage(shared: &Shared) {
    while let Some(request) = shared.compiler_queue.pop() {
        let compiled = compile_request(&shared.context, request);
        // The receiver lives as long as the compiler, which joins us first.
        let _ = shared.dispatch_sender.send(compiled);
    }
}

/// Resolves the shader cache of every stage; new masters keep their
/// generated source on the request for the compiler stage.
fn build_request(context: &CompilationContext, builder: &mut ShaderBuilder, request: &mut CompilerRequest) {
    for shader_type in ShaderType::ALL {
        let resolution = context.shader_cache_manager().resolve_shader_cache(
            context.library(),
            builder,
            &request.signature,
            shader_type,
        );
        match resolution {
            Ok(None) => {}
            Ok(Some(ShaderCacheResolution::Cached(shader_cache))) => {
                request.shader_caches[shader_type.index()] = Some(shader_cache);
            }
            Ok(Some(ShaderCacheResolution::Compile {
                shader_cache,
                source_code,
            })) => {
                context.debug_print_source(shader_cache.shader_cache_id(), shader_type, &source_code);
                request.shader_caches[shader_type.index()] = Some(shader_cache);
                request.source_codes[shader_type.index()] = Some(source_code);
            }
            Err(error) => {
                request.build_error = Some(error);
                return;
            }
        }
    }
}

/// Compiles pending sources, links the program and creates the PSO.
///
/// Pending sources are compiled even if the build failed in a later stage:
/// their masters are already visible to other requests.
fn compile_request(context: &CompilationContext, request: CompilerRequest) -> CompiledPipelineState {
    let device = context.device();
    let material_blueprint = &request.material_blueprint;
    let vertex_attributes = material_blueprint.vertex_attributes();

    let mut compile_failed = false;
    for (shader_cache, source_code) in request.shader_caches.iter().zip(&request.source_codes) {
        if let (Some(shader_cache), Some(source_code)) = (shader_cache, source_code) {
            compile_failed |= shader_cache
                .compile_source_code(device, vertex_attributes, source_code)
                .is_err();
        }
    }

    let pipeline_state = if let Some(error) = &request.build_error {
        log::error!(
            "Pipeline state {} of material blueprint '{}': {error}",
            request.signature.pipeline_state_signature_id(),
            material_blueprint.name()
        );
        None
    } else if compile_failed {
        None
    } else {
        match create_pipeline_state(context, &request) {
            Ok(pipeline_state) => pipeline_state,
            Err(error) => {
                log::error!(
                    "Pipeline state {} of material blueprint '{}': {error}",
                    request.signature.pipeline_state_signature_id(),
                    material_blueprint.name()
                );
                None
            }
        }
    };

    CompiledPipelineState {
        material_blueprint_id: material_blueprint.asset_id(),
        pipeline_state_signature_id: request.signature.pipeline_state_signature_id(),
        generation: request.generation,
        pipeline_state,
    }
}

/// `Ok(None)` if the target caches were cleared after the request was queued.
fn create_pipeline_state(
    context: &CompilationContext,
    request: &CompilerRequest,
) -> Result<Option<PipelineStateHandle>> {
    let device = context.device();
    let material_blueprint = &request.material_blueprint;

    let mut shaders: StageShaders = Default::default();
    for (shader, shader_cache) in shaders.iter_mut().zip(&request.shader_caches) {
        if let Some(shader_cache) = shader_cache {
            *shader = Some(shader_cache.realize_shader(device, material_blueprint.vertex_attributes())?);
        }
    }

    let Some(program_cache) = request.program_cache_manager.get_or_create_program_cache(
        device,
        material_blueprint,
        &request.signature,
        &shaders,
        request.generation,
    )?
    else {
        log::debug!(
            "Pipeline state {} of material blueprint '{}' queued before a clear, skipped",
            request.signature.pipeline_state_signature_id(),
            material_blueprint.name()
        );
        return Ok(None);
    };

    let pipeline_state = device.create_pipeline_state(&PipelineStateDescriptor {
        program: program_cache.program,
        root_signature: material_blueprint.root_signature(),
        vertex_attributes: material_blueprint.vertex_attributes(),
        state: &request.pipeline_state,
        label: Some(material_blueprint.name()),
    })?;
    log::debug!(
        "Pipeline state {} of material blueprint '{}' created",
        request.signature.pipeline_state_signature_id(),
        material_blueprint.name()
    );
    Ok(Some(pipeline_state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_queue_is_fifo_and_survives_reset() {
        let queue = StageQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(1));

        queue.shutdown();
        assert_eq!(queue.pop(), None);

        queue.reset();
        assert_eq!(queue.pop(), Some(2));
        queue.push(3);
        assert_eq!(queue.drain(), vec![3]);
    }

    #[test]
    fn stage_queue_wakes_blocked_consumer() {
        let queue = Arc::new(StageQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(10));
        queue.push(7);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }
}
