// Build script to compile GLSL shaders to SPIR-V
//
// Output follows the runtime lookup convention: assets/shaders/<name>.<stage>.spv

use std::path::Path;
use std::process::Command;

const SHADER_DIR: &str = "assets/shaders";
const SHADERS: &[&str] = &["Basic.vert", "Basic.frag"];

fn main() {
    println!("cargo:rerun-if-changed={}", SHADER_DIR);

    for shader in SHADERS {
        let input = format!("{}/{}", SHADER_DIR, shader);
        let output = format!("{}/{}.spv", SHADER_DIR, shader);
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}); {} was not compiled", e, input);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
