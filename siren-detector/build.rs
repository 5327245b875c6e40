use std::env;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=ffi/ei_shim.cpp");
    println!("cargo:rerun-if-env-changed=EI_SDK_DIR");

    if env::var("CARGO_FEATURE_EDGE_IMPULSE").is_ok() {
        build_edge_impulse();
    }
}

/// Compile the exported Edge Impulse C++ library together with the C ABI shim.
///
/// `EI_SDK_DIR` points at the unpacked "C++ library" export (the directory
/// holding `edge-impulse-sdk/`, `model-parameters/` and `tflite-model/`),
/// defaulting to `model/` next to this crate.
fn build_edge_impulse() {
    let manifest_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let sdk_root = env::var("EI_SDK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("model"));

    if !sdk_root.join("edge-impulse-sdk").exists() {
        panic!(
            "Edge Impulse export not found at {} (set EI_SDK_DIR)",
            sdk_root.display()
        );
    }

    let mut build = cc::Build::new();
    build
        .cpp(true)
        .flag_if_supported("-std=c++14")
        .flag_if_supported("-Wno-unused-parameter")
        .opt_level(3)
        .define("TF_LITE_DISABLE_X86_NEON", "1")
        .define("EIDSP_USE_CMSIS_DSP", "0")
        .define("EI_CLASSIFIER_TFLITE_ENABLE_CMSIS_NN", "0")
        .define("EI_CLASSIFIER_ENABLE_DETECTION_3D", "0")
        .include(&sdk_root)
        .include(sdk_root.join("edge-impulse-sdk"))
        .include(sdk_root.join("edge-impulse-sdk/third_party/ruy"))
        .include(sdk_root.join("edge-impulse-sdk/third_party/gemmlowp"))
        .include(sdk_root.join("edge-impulse-sdk/third_party/flatbuffers/include"))
        .include(sdk_root.join("model-parameters"))
        .include(sdk_root.join("tflite-model"))
        .file(manifest_dir.join("ffi/ei_shim.cpp"));

    add_source_files(&mut build, &sdk_root);

    build.compile("edge-impulse-sdk");

    println!("cargo:rerun-if-changed={}", sdk_root.display());
}

fn add_source_files(build: &mut cc::Build, dir: &Path) {
    for entry in std::fs::read_dir(dir).expect("Failed to read directory") {
        let entry = entry.expect("Failed to read directory entry");
        let path = entry.path();

        if path.is_dir() {
            if skip_dir(&path) {
                continue;
            }
            add_source_files(build, &path);
        } else if let Some(ext) = path.extension() {
            if ext == "c" || ext == "cpp" || ext == "cc" {
                build.file(&path);
            }
        }
    }
}

/// CMSIS kernels and non-POSIX ports only build for microcontrollers.
fn skip_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

    if name == "CMSIS" || name == "examples" || name == "test" {
        return true;
    }

    let in_porting = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n == "porting")
        .unwrap_or(false);

    in_porting && name != "posix"
}
