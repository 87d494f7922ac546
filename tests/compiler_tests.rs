//! Pipeline State Compiler Tests
//!
//! Tests for:
//! - Source-level shader dedup across combinations (aliases, single compile)
//! - Alias resolution depth
//! - Combination ids ignoring unreferenced properties
//! - Concurrent compilation of every combination
//! - Compiler pool replacement with requests in flight
//! - Hot reload of shader blueprints and shader pieces

use std::sync::Arc;
use std::time::Duration;

use myth_pipeline::backend::{NullRenderDevice, RenderDevice, ShaderType};
use myth_pipeline::renderer::pipeline::{PipelineStateSignature, ShaderCacheId};
use myth_pipeline::renderer::{
    PipelineStateCompilerSettings, RendererRuntime, RendererRuntimeSettings,
};
use myth_pipeline::resources::{
    MaterialBlueprint, MaterialShaderProperty, ShaderAssetLibrary, ShaderProperties,
    VisualImportance,
};
use myth_pipeline::utils::{AssetId, StringId};

fn library() -> ShaderAssetLibrary {
    let library = ShaderAssetLibrary::new();
    library.add_shader_piece("Lighting", "@piece(Lighting)fn lighting() {}\n@end").unwrap();
    library.add_shader_blueprint(
        "LitVs",
        "@property(USE_SKINNING)fn skin() {}\n@end\nfn vs_main() {}\n",
        &[],
    ).unwrap();
    // USE_TINT takes part in the combination id but never changes the source.
    library.add_shader_blueprint_with_references(
        "LitFs",
        "@insertpiece(Lighting)\n@property(USE_FOG)fog();\n@end\nfn fs_main() {}\n",
        &["Lighting"],
        &["USE_FOG", "USE_TINT"],
    ).unwrap();
    library
}

fn lit_blueprint() -> MaterialBlueprint {
    MaterialBlueprint::builder("Lit")
        .with_shader_blueprint(ShaderType::Vertex, "LitVs")
        .with_shader_blueprint(ShaderType::Fragment, "LitFs")
        .with_shader_property(MaterialShaderProperty::boolean(
            "USE_SKINNING",
            VisualImportance::Mandatory,
        ))
        .with_shader_property(MaterialShaderProperty::boolean(
            "USE_FOG",
            VisualImportance::Level(1),
        ))
        .with_shader_property(MaterialShaderProperty::boolean(
            "USE_TINT",
            VisualImportance::Level(0),
        ))
        .build()
}

fn runtime_with(
    device: NullRenderDevice,
    settings: PipelineStateCompilerSettings,
) -> (Arc<NullRenderDevice>, RendererRuntime, AssetId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Arc::new(device);
    let shared_device: Arc<dyn RenderDevice> = device.clone();
    let settings = RendererRuntimeSettings {
        compiler: settings,
        ..Default::default()
    };
    let mut runtime = RendererRuntime::new(shared_device, Arc::new(library()), settings).unwrap();
    let lit = runtime.add_material_blueprint(lit_blueprint());
    (device, runtime, lit)
}

fn synchronous() -> PipelineStateCompilerSettings {
    PipelineStateCompilerSettings {
        asynchronous_compilation: false,
        ..Default::default()
    }
}

fn signature(runtime: &RendererRuntime, lit: AssetId, values: &[(&str, i32)]) -> PipelineStateSignature {
    let blueprint = runtime.material_blueprints().get(lit).unwrap().material_blueprint();
    PipelineStateSignature::new(
        blueprint,
        runtime.library(),
        blueprint.pipeline_state().serialized_hash(),
        ShaderProperties::from(values),
        blueprint.default_dynamic_shader_pieces(),
    )
}

fn shader_cache_id(signature: &PipelineStateSignature, shader_type: ShaderType) -> ShaderCacheId {
    ShaderCacheId::from(signature.shader_combination_id(shader_type).unwrap())
}

// ============================================================================
// Shader Dedup
// ============================================================================

#[test]
fn identical_source_is_compiled_once_and_aliased() {
    let (device, mut runtime, lit) = runtime_with(NullRenderDevice::new(), synchronous());

    let plain = runtime
        .get_pipeline_state(lit, &ShaderProperties::new(), false)
        .unwrap();
    let tinted = runtime
        .get_pipeline_state(lit, &ShaderProperties::from(&[("USE_TINT", 1)][..]), false)
        .unwrap();
    assert_ne!(plain, tinted);
    assert_eq!(device.number_of_source_compiles_for(ShaderType::Fragment), 1);
    assert_eq!(device.number_of_source_compiles_for(ShaderType::Vertex), 1);

    let plain_id = shader_cache_id(&signature(&runtime, lit, &[]), ShaderType::Fragment);
    let tinted_id = shader_cache_id(&signature(&runtime, lit, &[("USE_TINT", 1)]), ShaderType::Fragment);
    assert_ne!(plain_id, tinted_id);

    let manager = runtime.shader_cache_manager();
    let master = manager.get(plain_id).unwrap();
    let alias = manager.get(tinted_id).unwrap();
    assert!(!master.is_alias());
    assert!(alias.is_alias());
    assert_eq!(
        alias.master_shader_cache().map(|m| m.shader_cache_id()),
        Some(plain_id)
    );
    assert_eq!(alias.shader(), master.shader());
}

#[test]
fn alias_chains_never_exceed_one_hop() {
    let (_device, mut runtime, lit) = runtime_with(NullRenderDevice::new(), synchronous());
    runtime.create_pipeline_state_caches(lit, false).unwrap();

    let combinations: [&[(&str, i32)]; 4] = [
        &[],
        &[("USE_TINT", 1)],
        &[("USE_FOG", 1)],
        &[("USE_FOG", 1), ("USE_TINT", 1)],
    ];
    let manager = runtime.shader_cache_manager();
    for values in combinations {
        let id = shader_cache_id(&signature(&runtime, lit, values), ShaderType::Fragment);
        let shader_cache = manager.get(id).unwrap();
        if let Some(master) = shader_cache.master_shader_cache() {
            assert!(master.master_shader_cache().is_none());
        }
    }
    // Two distinct fragment sources, two vertex sources.
    assert_eq!(manager.number_of_masters(), 4);
}

#[test]
fn unreferenced_properties_do_not_change_the_combination_id() {
    let (_device, runtime, lit) = runtime_with(NullRenderDevice::new(), synchronous());

    let plain = signature(&runtime, lit, &[]);
    let foggy = signature(&runtime, lit, &[("USE_FOG", 1)]);
    assert_eq!(
        plain.shader_combination_id(ShaderType::Vertex),
        foggy.shader_combination_id(ShaderType::Vertex)
    );
    assert_ne!(
        plain.shader_combination_id(ShaderType::Fragment),
        foggy.shader_combination_id(ShaderType::Fragment)
    );
    assert_ne!(plain.pipeline_state_signature_id(), foggy.pipeline_state_signature_id());

    // Deterministic across constructions.
    assert_eq!(plain, signature(&runtime, lit, &[]));
}

// ============================================================================
// Asynchronous Compilation
// ============================================================================

#[test]
fn every_combination_compiles_concurrently() {
    let (device, mut runtime, lit) = runtime_with(
        NullRenderDevice::new().with_compile_delay(Duration::from_millis(2)),
        PipelineStateCompilerSettings {
            number_of_compiler_threads: 4,
            ..Default::default()
        },
    );

    assert_eq!(runtime.create_pipeline_state_caches(lit, false).unwrap(), 8);
    runtime.flush_all_queues();

    let manager = runtime
        .material_blueprints()
        .get(lit)
        .unwrap()
        .pipeline_state_cache_manager();
    assert!(
        manager
            .iter()
            .all(|c| !c.is_using_fallback() && c.pipeline_state().is_some())
    );
    assert_eq!(device.number_of_source_compiles_for(ShaderType::Vertex), 2);
    assert_eq!(device.number_of_source_compiles_for(ShaderType::Fragment), 2);
    // Programs dedup on combination ids, which differ per USE_TINT value.
    assert_eq!(device.number_of_programs_created(), 8);
}

#[test]
fn compiler_pool_can_be_replaced_with_requests_in_flight() {
    let (_device, mut runtime, lit) = runtime_with(
        NullRenderDevice::new().with_compile_delay(Duration::from_millis(5)),
        PipelineStateCompilerSettings::default(),
    );
    assert_eq!(runtime.compiler().number_of_compiler_threads(), 2);

    runtime.create_pipeline_state_caches(lit, false).unwrap();
    runtime.set_number_of_compiler_threads(3).unwrap();
    assert_eq!(runtime.compiler().number_of_compiler_threads(), 3);
    assert_eq!(runtime.settings().compiler.number_of_compiler_threads, 3);

    runtime.set_number_of_compiler_threads(0).unwrap();
    assert_eq!(runtime.compiler().number_of_compiler_threads(), 1);

    runtime.flush_all_queues();
    let manager = runtime
        .material_blueprints()
        .get(lit)
        .unwrap()
        .pipeline_state_cache_manager();
    assert_eq!(manager.len(), 8);
    assert!(manager.iter().all(|c| c.pipeline_state().is_some()));
}

#[test]
fn dispatch_reports_published_results() {
    let (_device, mut runtime, lit) =
        runtime_with(NullRenderDevice::new(), PipelineStateCompilerSettings::default());
    let foggy = ShaderProperties::from(&[("USE_FOG", 1)][..]);

    assert_eq!(runtime.get_pipeline_state(lit, &foggy, false), None);
    let mut dispatched = 0;
    while runtime.compiler().number_of_in_flight_requests() > 0 {
        dispatched += runtime.dispatch();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(dispatched, 1);
    assert!(runtime.get_pipeline_state(lit, &foggy, false).is_some());
}

// ============================================================================
// Hot Reload
// ============================================================================

#[test]
fn reloading_a_shader_blueprint_rebuilds_its_pipeline_states() {
    let (device, mut runtime, lit) = runtime_with(NullRenderDevice::new(), synchronous());
    let before = runtime
        .get_pipeline_state(lit, &ShaderProperties::new(), false)
        .unwrap();

    runtime
        .reload_shader_blueprint(
            StringId::new("LitFs"),
            "@insertpiece(Lighting)\n// v2\nfn fs_main() {}\n",
        )
        .unwrap();
    assert!(runtime.shader_cache_manager().is_empty());
    assert_eq!(device.number_of_live_pipeline_states(), 0);

    let after = runtime
        .get_pipeline_state(lit, &ShaderProperties::new(), false)
        .unwrap();
    assert_ne!(before, after);
    assert!(
        device
            .pipeline_state_source_code(after, ShaderType::Fragment)
            .unwrap()
            .contains("// v2")
    );
    assert_eq!(device.number_of_live_pipeline_states(), 1);
}

#[test]
fn reloading_a_shader_piece_rebuilds_dependents() {
    let (device, mut runtime, lit) = runtime_with(NullRenderDevice::new(), synchronous());
    runtime
        .get_pipeline_state(lit, &ShaderProperties::new(), false)
        .unwrap();

    runtime
        .reload_shader_piece(
            StringId::new("Lighting"),
            "@piece(Lighting)fn lighting_v2() {}\n@end",
        )
        .unwrap();

    let pso = runtime
        .get_pipeline_state(lit, &ShaderProperties::new(), false)
        .unwrap();
    assert!(
        device
            .pipeline_state_source_code(pso, ShaderType::Fragment)
            .unwrap()
            .contains("lighting_v2")
    );
}

#[test]
fn reloading_an_unknown_asset_fails() {
    let (_device, mut runtime, _lit) = runtime_with(NullRenderDevice::new(), synchronous());
    assert!(
        runtime
            .reload_shader_blueprint(StringId::new("Missing"), "fn main() {}")
            .is_err()
    );
}
