//! Pipeline State Cache Tests
//!
//! Tests for:
//! - Mandatory warm-up followed by fallback seeding and publication
//! - Fallback stripping order by visual importance
//! - Misses without fallback: null entries, emergency synchronous compilation
//! - Synchronous mode and queue flushing
//! - Compile failures publishing a null PSO, asynchronously or at warm-up
//! - Cache clearing discarding in-flight results and their programs
//! - Late results for replaced blueprints or entries holding their exact PSO
//! - Pipeline state overrides

use std::sync::Arc;
use std::time::Duration;

use myth_pipeline::backend::{NullRenderDevice, RenderDevice, ShaderType, VertexAttributes};
use myth_pipeline::renderer::pipeline::{
    CompilationContext, CompiledPipelineState, CompilerRequest, PipelineState,
    PipelineStateCompiler, ProgramCacheManager,
};
use myth_pipeline::renderer::{
    PipelineStateCompilerSettings, RendererRuntime, RendererRuntimeSettings,
};
use myth_pipeline::resources::{
    MaterialBlueprint, MaterialBlueprintResourceManager, MaterialShaderProperty,
    ShaderAssetLibrary, ShaderProperties, VisualImportance,
};
use myth_pipeline::utils::AssetId;

const VERTEX_SHADER: &str = "\
@insertpiece(VertexInput)
@property(USE_SKINNING)fn skin() {}
@end
fn vs_main() {}
";

const FRAGMENT_SHADER: &str = "\
@insertpiece(Header)
@property(USE_SKINNING)// skinned
@end
@foreach(NUM_LIGHTS, i)light(@i);
@end
@property(USE_FOG)fog();
@end
fn fs_main() {}
";

fn library() -> ShaderAssetLibrary {
    let library = ShaderAssetLibrary::new();
    library.add_shader_piece("Common", "@piece(Header)// common header\n@end").unwrap();
    library.add_shader_blueprint("MeshVs", VERTEX_SHADER, &[]).unwrap();
    library.add_shader_blueprint("MeshFs", FRAGMENT_SHADER, &["Common"]).unwrap();
    library
}

fn mesh_blueprint() -> MaterialBlueprint {
    MaterialBlueprint::builder("Mesh")
        .with_shader_blueprint(ShaderType::Vertex, "MeshVs")
        .with_shader_blueprint(ShaderType::Fragment, "MeshFs")
        .with_vertex_attributes(VertexAttributes::new().with_buffer(
            wgpu::VertexStepMode::Vertex,
            &[("position", wgpu::VertexFormat::Float32x3)],
        ))
        .with_shader_property(MaterialShaderProperty::boolean(
            "USE_SKINNING",
            VisualImportance::Mandatory,
        ))
        .with_shader_property(MaterialShaderProperty::integer(
            "NUM_LIGHTS",
            4,
            VisualImportance::Level(2),
        ))
        .with_shader_property(MaterialShaderProperty::boolean(
            "USE_FOG",
            VisualImportance::Level(1),
        ))
        .build()
}

fn properties(values: &[(&str, i32)]) -> ShaderProperties {
    let mut properties = ShaderProperties::new();
    for (name, value) in values {
        properties.set(name, *value);
    }
    properties
}

struct Fixture {
    device: Arc<NullRenderDevice>,
    runtime: RendererRuntime,
    mesh: AssetId,
}

fn fixture_with(device: NullRenderDevice, asynchronous_compilation: bool) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Arc::new(device);
    let shared_device: Arc<dyn RenderDevice> = device.clone();
    let settings = RendererRuntimeSettings {
        compiler: PipelineStateCompilerSettings {
            asynchronous_compilation,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut runtime = RendererRuntime::new(shared_device, Arc::new(library()), settings).unwrap();
    let mesh = runtime.add_material_blueprint(mesh_blueprint());
    Fixture {
        device,
        runtime,
        mesh,
    }
}

fn fixture(asynchronous_compilation: bool) -> Fixture {
    fixture_with(NullRenderDevice::new(), asynchronous_compilation)
}

// ============================================================================
// Warm-up and Fallback Seeding
// ============================================================================

#[test]
fn mandatory_warm_up_then_fallback_until_exact_pso_is_dispatched() {
    let mut f = fixture(true);

    let created = f.runtime.create_pipeline_state_caches(f.mesh, true).unwrap();
    assert_eq!(created, 2);
    f.runtime.flush_all_queues();

    let skinned = properties(&[("USE_SKINNING", 1)]);
    let skinned_cache = f.runtime.pipeline_state_cache(f.mesh, &skinned).unwrap();
    assert!(!skinned_cache.is_using_fallback());
    let skinned_pso = skinned_cache.pipeline_state().unwrap();

    // NUM_LIGHTS is not mandatory: the skinned PSO stands in immediately.
    let request = properties(&[("USE_SKINNING", 1), ("NUM_LIGHTS", 2)]);
    assert_eq!(
        f.runtime.get_pipeline_state(f.mesh, &request, false),
        Some(skinned_pso)
    );
    assert!(
        f.runtime
            .pipeline_state_cache(f.mesh, &request)
            .unwrap()
            .is_using_fallback()
    );

    f.runtime.flush_all_queues();
    let exact = f.runtime.pipeline_state_cache(f.mesh, &request).unwrap();
    assert!(!exact.is_using_fallback());
    let exact_pso = exact.pipeline_state().unwrap();
    assert_ne!(exact_pso, skinned_pso);

    let source = f
        .device
        .pipeline_state_source_code(exact_pso, ShaderType::Fragment)
        .unwrap();
    assert!(source.contains("// skinned"));
    assert!(source.contains("light(0);"));
    assert!(source.contains("light(1);"));
    assert!(!source.contains("light(2);"));

    // The fallback is still owned by its own entry.
    assert_eq!(f.device.number_of_live_pipeline_states(), 3);
}

#[test]
fn fallback_strips_lowest_visual_importance_first() {
    let mut f = fixture(true);

    // Emergency compilation seeds exact entries while nothing can serve as fallback.
    let with_lights = properties(&[("USE_SKINNING", 1), ("NUM_LIGHTS", 1)]);
    let with_fog = properties(&[("USE_SKINNING", 1), ("USE_FOG", 1)]);
    let lights_pso = f.runtime.get_pipeline_state(f.mesh, &with_lights, true).unwrap();
    let fog_pso = f.runtime.get_pipeline_state(f.mesh, &with_fog, true).unwrap();
    assert_ne!(lights_pso, fog_pso);

    // USE_FOG (level 1) goes before NUM_LIGHTS (level 2).
    let request = properties(&[("USE_SKINNING", 1), ("NUM_LIGHTS", 1), ("USE_FOG", 1)]);
    assert_eq!(
        f.runtime.get_pipeline_state(f.mesh, &request, false),
        Some(lights_pso)
    );
}

#[test]
fn fallback_ignores_entries_that_are_themselves_fallbacks() {
    let mut f = fixture(true);

    let skinned = properties(&[("USE_SKINNING", 1)]);
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &skinned, false), None);

    // The skinned entry exists but holds no PSO yet.
    let request = properties(&[("USE_SKINNING", 1), ("USE_FOG", 1)]);
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &request, false), None);

    f.runtime.flush_all_queues();
    assert!(f.runtime.get_pipeline_state(f.mesh, &request, false).is_some());
}

// ============================================================================
// Misses Without Fallback
// ============================================================================

#[test]
fn miss_without_fallback_returns_none_and_queues_once() {
    let mut f = fixture(true);
    let skinned = properties(&[("USE_SKINNING", 1)]);

    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &skinned, false), None);
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &skinned, false), None);
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 1);

    let pending = f.runtime.pipeline_state_cache(f.mesh, &skinned).unwrap();
    assert!(pending.is_using_fallback());
    assert_eq!(pending.pipeline_state(), None);

    f.runtime.flush_all_queues();
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 0);
    let cache = f.runtime.pipeline_state_cache(f.mesh, &skinned).unwrap();
    assert!(!cache.is_using_fallback());
    assert!(cache.pipeline_state().is_some());
    assert_eq!(f.device.number_of_pipeline_states_created(), 1);
}

#[test]
fn emergency_synchronous_compilation_returns_exact_pso() {
    let mut f = fixture(true);
    let skinned = properties(&[("USE_SKINNING", 1)]);

    let pso = f.runtime.get_pipeline_state(f.mesh, &skinned, true);
    assert!(pso.is_some());
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 0);

    let cache = f.runtime.pipeline_state_cache(f.mesh, &skinned).unwrap();
    assert!(!cache.is_using_fallback());
    assert_eq!(cache.pipeline_state(), pso);
}

#[test]
fn unknown_material_blueprint_yields_none() {
    let mut f = fixture(true);
    let unknown = myth_pipeline::utils::StringId::new("Unknown");
    assert_eq!(
        f.runtime.get_pipeline_state(unknown, &ShaderProperties::new(), true),
        None
    );
    assert!(f.runtime.create_pipeline_state_caches(unknown, true).is_err());
}

// ============================================================================
// Synchronous Mode
// ============================================================================

#[test]
fn synchronous_mode_compiles_inline() {
    let mut f = fixture(false);
    let request = properties(&[("NUM_LIGHTS", 3)]);

    let pso = f.runtime.get_pipeline_state(f.mesh, &request, false).unwrap();
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 0);
    assert!(
        f.device
            .pipeline_state_source_code(pso, ShaderType::Fragment)
            .unwrap()
            .contains("light(2);")
    );

    // Mandatory and optional combinations alike: 2 * 4 * 2.
    let created = f.runtime.create_pipeline_state_caches(f.mesh, false).unwrap();
    assert_eq!(created, 15);
    let manager = f
        .runtime
        .material_blueprints()
        .get(f.mesh)
        .unwrap()
        .pipeline_state_cache_manager();
    assert_eq!(manager.len(), 16);
    assert!(
        manager
            .iter()
            .all(|c| !c.is_using_fallback() && c.pipeline_state().is_some())
    );
}

#[test]
fn disabling_asynchronous_compilation_flushes_pending_requests() {
    let mut f = fixture_with(
        NullRenderDevice::new().with_compile_delay(Duration::from_millis(5)),
        true,
    );
    let requests = [
        properties(&[]),
        properties(&[("USE_SKINNING", 1)]),
        properties(&[("NUM_LIGHTS", 1)]),
        properties(&[("NUM_LIGHTS", 2)]),
        properties(&[("NUM_LIGHTS", 3)]),
    ];
    for request in &requests {
        assert_eq!(f.runtime.get_pipeline_state(f.mesh, request, false), None);
    }
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 5);

    f.runtime.set_asynchronous_compilation_enabled(false);
    assert!(!f.runtime.compiler().is_asynchronous_compilation_enabled());
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 0);
    for request in &requests {
        let cache = f.runtime.pipeline_state_cache(f.mesh, request).unwrap();
        assert!(!cache.is_using_fallback());
        assert!(cache.pipeline_state().is_some());
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn compile_failure_publishes_null_pipeline_state() {
    let mut f = fixture_with(NullRenderDevice::new().with_compile_failure_pattern("fog();"), true);
    let foggy = properties(&[("USE_FOG", 1)]);

    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &foggy, false), None);
    f.runtime.flush_all_queues();

    let cache = f.runtime.pipeline_state_cache(f.mesh, &foggy).unwrap();
    assert!(!cache.is_using_fallback());
    assert_eq!(cache.pipeline_state(), None);
    assert_eq!(f.device.number_of_live_pipeline_states(), 0);

    // No implicit retry.
    let compiles = f.device.number_of_source_compiles();
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &foggy, true), None);
    assert_eq!(f.device.number_of_source_compiles(), compiles);

    // Other combinations are unaffected.
    assert!(
        f.runtime
            .get_pipeline_state(f.mesh, &ShaderProperties::new(), true)
            .is_some()
    );
}

#[test]
fn synchronous_warm_up_keeps_going_past_a_failed_combination() {
    let mut f = fixture_with(NullRenderDevice::new().with_compile_failure_pattern("skin()"), false);

    let created = f.runtime.create_pipeline_state_caches(f.mesh, true).unwrap();
    assert_eq!(created, 2);
    let failed = f
        .runtime
        .pipeline_state_cache(f.mesh, &properties(&[("USE_SKINNING", 1)]))
        .unwrap();
    assert!(!failed.is_using_fallback());
    assert_eq!(failed.pipeline_state(), None);
    assert!(
        f.runtime
            .pipeline_state_cache(f.mesh, &ShaderProperties::new())
            .unwrap()
            .pipeline_state()
            .is_some()
    );
    assert_eq!(f.device.number_of_live_pipeline_states(), 1);
}

#[test]
fn malformed_blueprint_publishes_null_pipeline_state() {
    let mut f = fixture(true);
    f.runtime
        .library()
        .add_shader_blueprint("MeshFs", "@property(USE_FOG)never closed", &["Common"]).unwrap();

    assert_eq!(
        f.runtime
            .get_pipeline_state(f.mesh, &properties(&[("USE_FOG", 1)]), true),
        None
    );
    assert_eq!(f.device.number_of_pipeline_states_created(), 0);
}

// ============================================================================
// Clearing
// ============================================================================

#[test]
fn clearing_discards_results_of_requests_queued_before() {
    let device = Arc::new(NullRenderDevice::new().with_compile_delay(Duration::from_millis(10)));
    let shared_device: Arc<dyn RenderDevice> = device.clone();
    let context = Arc::new(CompilationContext::new(shared_device, Arc::new(library()), false));
    let compiler =
        PipelineStateCompiler::new(context, &PipelineStateCompilerSettings::default()).unwrap();
    let mut material_blueprints = MaterialBlueprintResourceManager::new();
    let mesh = material_blueprints.add(device.as_ref(), Arc::new(mesh_blueprint()));

    {
        let resource = material_blueprints.get_mut(mesh).unwrap();
        let pieces = resource.material_blueprint().default_dynamic_shader_pieces();
        let manager = resource.pipeline_state_cache_manager_mut();
        let before = manager.generation();
        for combination in [&[("USE_SKINNING", 1)][..], &[("USE_FOG", 1)], &[("NUM_LIGHTS", 2)]] {
            assert_eq!(
                manager.get_pipeline_state_cache_by_combination(
                    &compiler,
                    &properties(combination),
                    &pieces,
                    false
                ),
                None
            );
        }
        manager.clear_cache(device.as_ref());
        assert_ne!(manager.generation(), before);
        assert_eq!(manager.program_cache_manager().generation(), manager.generation());
    }

    compiler.flush_all_queues(&mut material_blueprints);
    let manager = material_blueprints.get(mesh).unwrap().pipeline_state_cache_manager();
    assert!(manager.is_empty());
    // Requests that were linking during the clear never repopulate it.
    assert!(manager.program_cache_manager().is_empty());
    assert_eq!(device.number_of_live_programs(), 0);
    assert_eq!(device.number_of_live_pipeline_states(), 0);
}

#[test]
fn results_for_a_replaced_blueprint_are_discarded() {
    let mut f = fixture_with(
        NullRenderDevice::new().with_compile_delay(Duration::from_millis(20)),
        true,
    );
    let skinned = properties(&[("USE_SKINNING", 1)]);
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &skinned, false), None);

    assert!(f.runtime.remove_material_blueprint(f.mesh));
    assert_eq!(f.runtime.add_material_blueprint(mesh_blueprint()), f.mesh);
    let fresh = f.runtime.get_pipeline_state(f.mesh, &skinned, true).unwrap();

    f.runtime.flush_all_queues();
    assert_eq!(f.runtime.compiler().number_of_in_flight_requests(), 0);
    assert_eq!(f.runtime.get_pipeline_state(f.mesh, &skinned, false), Some(fresh));
    let cache = f.runtime.pipeline_state_cache(f.mesh, &skinned).unwrap();
    assert!(!cache.is_using_fallback());
    assert_eq!(f.device.number_of_live_pipeline_states(), 1);
    assert_eq!(f.device.number_of_live_programs(), 1);
}

#[test]
fn late_result_never_replaces_an_exact_pipeline_state() {
    let device = Arc::new(NullRenderDevice::new());
    let shared_device: Arc<dyn RenderDevice> = device.clone();
    let context = Arc::new(CompilationContext::new(shared_device, Arc::new(library()), false));
    let compiler =
        PipelineStateCompiler::new(context, &PipelineStateCompilerSettings::default()).unwrap();
    let mut material_blueprints = MaterialBlueprintResourceManager::new();
    let mesh = material_blueprints.add(device.as_ref(), Arc::new(mesh_blueprint()));
    let skinned = properties(&[("USE_SKINNING", 1)]);

    let resource = material_blueprints.get_mut(mesh).unwrap();
    let material_blueprint = Arc::clone(resource.material_blueprint());
    let pieces = material_blueprint.default_dynamic_shader_pieces();
    let manager = resource.pipeline_state_cache_manager_mut();
    let exact = manager
        .get_pipeline_state_cache_by_combination(&compiler, &skinned, &pieces, true)
        .unwrap();
    let generation = manager.generation();
    let signature = manager.iter().next().unwrap().signature().clone();

    // A second PSO for the same entry, linked outside the manager.
    let duplicate = compiler
        .instant_synchronous_compiler_request(CompilerRequest::new(
            Arc::clone(&material_blueprint),
            Arc::new(ProgramCacheManager::new(generation)),
            signature.clone(),
            material_blueprint.pipeline_state().clone(),
            generation,
        ))
        .unwrap();
    assert_ne!(duplicate, exact);
    assert_eq!(device.number_of_live_pipeline_states(), 2);

    material_blueprints.publish(
        device.as_ref(),
        &CompiledPipelineState {
            material_blueprint_id: mesh,
            pipeline_state_signature_id: signature.pipeline_state_signature_id(),
            generation,
            pipeline_state: Some(duplicate),
        },
    );

    let manager = material_blueprints.get(mesh).unwrap().pipeline_state_cache_manager();
    let cache = manager.get(signature.pipeline_state_signature_id()).unwrap();
    assert_eq!(cache.pipeline_state(), Some(exact));
    assert!(!cache.is_using_fallback());
    assert_eq!(device.number_of_live_pipeline_states(), 1);
    assert_eq!(device.pipeline_state_program(duplicate), None);
}

#[test]
fn dropping_the_runtime_releases_every_backend_object() {
    let mut f = fixture(true);
    f.runtime.create_pipeline_state_caches(f.mesh, false).unwrap();
    f.runtime
        .get_pipeline_state(f.mesh, &properties(&[("USE_SKINNING", 1)]), false);

    let device = Arc::clone(&f.device);
    drop(f);
    assert_eq!(device.number_of_live_pipeline_states(), 0);
    assert_eq!(device.number_of_live_programs(), 0);
    assert_eq!(device.number_of_live_shaders(), 0);
    assert!(device.number_of_pipeline_states_created() > 0);
}

// ============================================================================
// Pipeline State Overrides
// ============================================================================

#[test]
fn overridden_pipeline_state_gets_its_own_entry() {
    let mut f = fixture(true);
    let skinned = properties(&[("USE_SKINNING", 1)]);
    let wireframe = PipelineState::default().with_topology(wgpu::PrimitiveTopology::LineList);
    let pieces = mesh_blueprint().default_dynamic_shader_pieces();

    let default_pso = f.runtime.get_pipeline_state(f.mesh, &skinned, true).unwrap();
    let wireframe_pso = f
        .runtime
        .get_pipeline_state_with(f.mesh, Some(&wireframe), &skinned, &pieces, true)
        .unwrap();
    assert_ne!(default_pso, wireframe_pso);
    assert_eq!(
        f.device.pipeline_state_serialized_hash(wireframe_pso),
        Some(wireframe.serialized_hash())
    );

    // Same shaders, same program.
    assert_eq!(
        f.device.pipeline_state_program(default_pso),
        f.device.pipeline_state_program(wireframe_pso)
    );
    assert_eq!(f.device.number_of_programs_created(), 1);
}
