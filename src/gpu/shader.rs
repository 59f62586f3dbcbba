//! WGSL programs: define injection, preprocessing, validation and reflection.
//!
//! Sources are assembled from chunks, prefixed with one `const` per numeric
//! define, filtered through a small `#ifdef`/`#ifndef`/`#else`/`#endif`
//! preprocessor and validated by naga. The validated module is reflected
//! for uniform blocks, texture/sampler bindings, vertex attribute locations
//! and fragment output locations.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::error;

use super::uniforms::UniformLayout;
use crate::util::{Error, Result};

/// Compile-time value handed to a shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefineValue {
    /// Only visible to `#ifdef`
    Flag(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
}

impl DefineValue {
    /// Falsy values (false, 0) are not defined for `#ifdef`.
    pub fn is_defined(&self) -> bool {
        match *self {
            Self::Flag(b) => b,
            Self::Int(v) => v != 0,
            Self::UInt(v) => v != 0,
            Self::Float(v) => v != 0.0,
        }
    }

    fn const_decl(&self, name: &str) -> Result<Option<String>> {
        Ok(match *self {
            Self::Flag(_) => None,
            Self::Int(v) => Some(format!("const {name}: i32 = {v}i;")),
            Self::UInt(v) => Some(format!("const {name}: u32 = {v}u;")),
            Self::Float(v) if v.is_finite() => Some(format!("const {name}: f32 = {v:?};")),
            Self::Float(v) => return Err(Error::other(format!("define {name} is not finite: {v}"))),
        })
    }
}

impl From<bool> for DefineValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<i32> for DefineValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for DefineValue {
    fn from(v: u32) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for DefineValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

/// Ordered set of shader defines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defines(BTreeMap<String, DefineValue>);

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<DefineValue>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<DefineValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn extend(&mut self, other: &Defines) {
        self.0.extend(other.0.iter().map(|(k, v)| (k.clone(), *v)));
    }

    pub fn get(&self, name: &str) -> Option<DefineValue> {
        self.0.get(name).copied()
    }

    fn defined_names(&self) -> HashSet<&str> {
        self.0.iter().filter(|(_, v)| v.is_defined()).map(|(k, _)| k.as_str()).collect()
    }

    fn header(&self) -> Result<String> {
        let mut out = String::new();
        for (name, value) in &self.0 {
            if let Some(decl) = value.const_decl(name)? {
                out.push_str(&decl);
                out.push('\n');
            }
        }
        Ok(out)
    }
}

/// Resolve `#ifdef NAME`, `#ifndef NAME`, `#else` and `#endif` lines.
pub fn preprocess(source: &str, defined: &HashSet<&str>) -> std::result::Result<String, String> {
    // One entry per open block: (this branch active, parent active)
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (line_no, line) in source.lines().enumerate() {
        let active = stack.last().map_or(true, |&(a, _)| a);
        let trimmed = line.trim_start();
        let mut words = trimmed.split_whitespace();
        match words.next() {
            Some(directive @ ("#ifdef" | "#ifndef")) => {
                let name = words.next().ok_or_else(|| format!("line {}: {directive} without a name", line_no + 1))?;
                let cond = defined.contains(name) == (directive == "#ifdef");
                stack.push((active && cond, active));
            }
            Some("#else") => {
                let (branch, parent) =
                    stack.pop().ok_or_else(|| format!("line {}: #else without #ifdef", line_no + 1))?;
                stack.push((parent && !branch, parent));
            }
            Some("#endif") => {
                stack.pop().ok_or_else(|| format!("line {}: #endif without #ifdef", line_no + 1))?;
            }
            _ if active => {
                out.push_str(line);
                out.push('\n');
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(format!("{} unterminated #ifdef block(s)", stack.len()));
    }
    Ok(out)
}

/// Kind of a reflected resource binding.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingKind {
    UniformBuffer { size: u32 },
    Texture { sample_kind: naga::ScalarKind, arrayed: bool, depth: bool },
    Sampler,
}

/// Reflected `@group/@binding` resource.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingInfo {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Per-resource overrides for bind group layout derivation.
///
/// Float textures default to filterable and samplers to filtering; textures
/// named here are declared unfilterable (32-bit float targets read with
/// `textureLoad`) and samplers non-filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingHints<'a> {
    pub unfilterable: &'a [&'a str],
    pub non_filtering: &'a [&'a str],
}

/// Compiled and reflected WGSL program with one vertex and one fragment stage.
#[derive(Debug)]
pub struct ShaderProgram {
    label: String,
    source: String,
    module: naga::Module,
    vertex_entry: String,
    fragment_entry: String,
    uniforms: Vec<UniformLayout>,
    bindings: Vec<BindingInfo>,
    attributes: HashMap<String, u32>,
    outputs: HashMap<String, u32>,
}

impl ShaderProgram {
    /// Assemble, preprocess and validate a program.
    ///
    /// On a parse or validation failure the full numbered source is logged
    /// before the error is returned.
    pub fn compile(
        label: &str,
        chunks: &[&str],
        defines: &Defines,
        vertex_entry: &str,
        fragment_entry: &str,
    ) -> Result<Self> {
        let raw = format!("{}{}", defines.header()?, chunks.concat());
        let source = preprocess(&raw, &defines.defined_names())
            .map_err(|message| Error::ShaderCompile { label: label.to_string(), message })?;

        let module = match naga::front::wgsl::parse_str(&source) {
            Ok(m) => m,
            Err(e) => {
                dump_numbered(label, &source);
                return Err(Error::ShaderCompile { label: label.to_string(), message: e.emit_to_string(&source) });
            }
        };

        if let Err(e) = Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module) {
            dump_numbered(label, &source);
            return Err(Error::ShaderCompile { label: label.to_string(), message: error_chain(e.as_inner()) });
        }

        let mut program = Self {
            label: label.to_string(),
            source,
            module,
            vertex_entry: vertex_entry.to_string(),
            fragment_entry: fragment_entry.to_string(),
            uniforms: Vec::new(),
            bindings: Vec::new(),
            attributes: HashMap::new(),
            outputs: HashMap::new(),
        };
        program.link()?;
        program.reflect_resources();
        Ok(program)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Final preprocessed source.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn vertex_entry(&self) -> &str {
        &self.vertex_entry
    }

    pub fn fragment_entry(&self) -> &str {
        &self.fragment_entry
    }

    /// Vertex input locations by argument name.
    pub fn attributes(&self) -> &HashMap<String, u32> {
        &self.attributes
    }

    /// Fragment output locations by member name.
    pub fn outputs(&self) -> &HashMap<String, u32> {
        &self.outputs
    }

    pub fn output_location(&self, name: &str) -> Option<u32> {
        self.outputs.get(name).copied()
    }

    pub fn bindings(&self) -> &[BindingInfo] {
        &self.bindings
    }

    pub fn binding(&self, name: &str) -> Option<&BindingInfo> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Reflected layout of the uniform variable `name`.
    pub fn uniform_block(&self, name: &str) -> Option<&UniformLayout> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    /// Value of an integer module-scope constant.
    pub fn constant_u32(&self, name: &str) -> Option<u32> {
        let (_, c) = self.module.constants.iter().find(|(_, c)| c.name.as_deref() == Some(name))?;
        match self.module.global_expressions[c.init] {
            naga::Expression::Literal(naga::Literal::U32(v)) => Some(v),
            naga::Expression::Literal(naga::Literal::I32(v)) => u32::try_from(v).ok(),
            naga::Expression::Literal(naga::Literal::AbstractInt(v)) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn create_module(&self, device: &wgpu::Device) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&self.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&self.source)),
        })
    }

    /// Layout entries for bind group `group`, derived from reflection.
    pub fn layout_entries(&self, group: u32, hints: BindingHints<'_>) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.bindings
            .iter()
            .filter(|b| b.group == group)
            .map(|b| wgpu::BindGroupLayoutEntry {
                binding: b.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: match &b.kind {
                    BindingKind::UniformBuffer { size } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(*size as u64),
                    },
                    BindingKind::Texture { sample_kind, arrayed, depth } => wgpu::BindingType::Texture {
                        sample_type: if *depth {
                            wgpu::TextureSampleType::Depth
                        } else {
                            match sample_kind {
                                naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                                naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                                _ => wgpu::TextureSampleType::Float {
                                    filterable: !hints.unfilterable.contains(&b.name.as_str()),
                                },
                            }
                        },
                        view_dimension: if *arrayed {
                            wgpu::TextureViewDimension::D2Array
                        } else {
                            wgpu::TextureViewDimension::D2
                        },
                        multisampled: false,
                    },
                    BindingKind::Sampler => wgpu::BindingType::Sampler(if hints.non_filtering.contains(&b.name.as_str()) {
                        wgpu::SamplerBindingType::NonFiltering
                    } else {
                        wgpu::SamplerBindingType::Filtering
                    }),
                },
                count: None,
            })
            .collect()
    }

    pub fn create_bind_group_layout(&self, device: &wgpu::Device, hints: BindingHints<'_>) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{}_layout", self.label)),
            entries: &self.layout_entries(0, hints),
        })
    }

    fn entry_point(&self, name: &str, stage: naga::ShaderStage) -> Option<&naga::EntryPoint> {
        self.module.entry_points.iter().find(|e| e.name == name && e.stage == stage)
    }

    /// Check both stages exist and every fragment input is produced by the vertex stage.
    fn link(&mut self) -> Result<()> {
        let link_err = |message: String| Error::ShaderLink { label: self.label.clone(), message };

        let vertex = self
            .entry_point(&self.vertex_entry, naga::ShaderStage::Vertex)
            .ok_or_else(|| link_err(format!("no vertex entry point '{}'", self.vertex_entry)))?;
        let fragment = self
            .entry_point(&self.fragment_entry, naga::ShaderStage::Fragment)
            .ok_or_else(|| link_err(format!("no fragment entry point '{}'", self.fragment_entry)))?;

        let varyings: HashSet<u32> = match &vertex.function.result {
            Some(r) => self.locations(r.ty, r.binding.as_ref()).into_iter().map(|(_, l)| l).collect(),
            None => HashSet::new(),
        };
        for arg in &fragment.function.arguments {
            for (name, location) in self.locations(arg.ty, arg.binding.as_ref()) {
                if !varyings.contains(&location) {
                    return Err(link_err(format!(
                        "fragment input '{name}' at location {location} is not written by the vertex stage"
                    )));
                }
            }
        }

        let attributes = vertex
            .function
            .arguments
            .iter()
            .flat_map(|a| self.named_locations(a.name.as_deref(), a.ty, a.binding.as_ref()))
            .collect();
        let outputs = match &fragment.function.result {
            Some(r) => self.named_locations(None, r.ty, r.binding.as_ref()),
            None => Vec::new(),
        };
        self.attributes = attributes;
        self.outputs = outputs.into_iter().collect();
        Ok(())
    }

    fn named_locations(
        &self,
        name: Option<&str>,
        ty: naga::Handle<naga::Type>,
        binding: Option<&naga::Binding>,
    ) -> Vec<(String, u32)> {
        match binding {
            Some(naga::Binding::Location { location, .. }) => {
                vec![(name.unwrap_or("out").to_string(), *location)]
            }
            Some(_) => Vec::new(),
            None => self.locations(ty, None),
        }
    }

    /// `@location` bindings of a value, looking through one struct level.
    fn locations(&self, ty: naga::Handle<naga::Type>, binding: Option<&naga::Binding>) -> Vec<(String, u32)> {
        if let Some(naga::Binding::Location { location, .. }) = binding {
            return vec![(String::new(), *location)];
        }
        match &self.module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|m| match m.binding {
                    Some(naga::Binding::Location { location, .. }) => {
                        Some((m.name.clone().unwrap_or_default(), location))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn reflect_resources(&mut self) {
        for (_, var) in self.module.global_variables.iter() {
            let (Some(rb), Some(name)) = (&var.binding, &var.name) else {
                continue;
            };
            let inner = &self.module.types[var.ty].inner;
            let kind = match (var.space, inner) {
                (naga::AddressSpace::Uniform, _) => {
                    let layout = UniformLayout::reflect(&self.module, name, var.ty, rb.group, rb.binding);
                    let size = layout.size;
                    self.uniforms.push(layout);
                    BindingKind::UniformBuffer { size }
                }
                (naga::AddressSpace::Handle, naga::TypeInner::Image { arrayed, class, .. }) => match class {
                    naga::ImageClass::Sampled { kind, .. } => {
                        BindingKind::Texture { sample_kind: *kind, arrayed: *arrayed, depth: false }
                    }
                    naga::ImageClass::Depth { .. } => {
                        BindingKind::Texture { sample_kind: naga::ScalarKind::Float, arrayed: *arrayed, depth: true }
                    }
                    _ => continue,
                },
                (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => BindingKind::Sampler,
                _ => continue,
            };
            self.bindings.push(BindingInfo { name: name.clone(), group: rb.group, binding: rb.binding, kind });
        }
        self.bindings.sort_by_key(|b| (b.group, b.binding));
    }
}

fn dump_numbered(label: &str, source: &str) {
    let numbered: String = source
        .lines()
        .enumerate()
        .map(|(i, l)| format!("{:4}: {}\n", i + 1, l))
        .collect();
    error!(shader = label, "shader failed to compile:\n{numbered}");
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
struct Params {
    scale: vec2<f32>,
    tint: vec4<f32>,
}
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var color_tex: texture_2d<f32>;
@group(0) @binding(2) var color_sampler: sampler;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.position = vec4<f32>(position * params.scale, 0.0, 1.0);
    out.uv = position;
    return out;
}

struct FsOut {
    @location(0) color: vec4<f32>,
    @location(1) extra: vec4<f32>,
}

@fragment
fn fs_main(in: VsOut) -> FsOut {
    var out: FsOut;
    out.color = textureSample(color_tex, color_sampler, in.uv) * params.tint;
#ifdef DOUBLE
    out.color = out.color * 2.0;
#else
    out.color = out.color * f32(COUNT);
#endif
    out.extra = vec4<f32>(1.0);
    return out;
}
"#;

    fn defined(names: &[&'static str]) -> HashSet<&'static str> {
        names.iter().copied().collect()
    }

    #[test]
    fn test_preprocess_branches() {
        let src = "a\n#ifdef X\nb\n#else\nc\n#endif\n#ifndef Y\nd\n#endif\n";
        assert_eq!(preprocess(src, &defined(&["X"])).unwrap(), "a\nb\nd\n");
        assert_eq!(preprocess(src, &defined(&["Y"])).unwrap(), "a\nc\n");
    }

    #[test]
    fn test_preprocess_nested() {
        let src = "#ifdef A\n#ifdef B\nab\n#else\na\n#endif\n#else\nnone\n#endif\n";
        assert_eq!(preprocess(src, &defined(&["A", "B"])).unwrap(), "ab\n");
        assert_eq!(preprocess(src, &defined(&["A"])).unwrap(), "a\n");
        assert_eq!(preprocess(src, &defined(&["B"])).unwrap(), "none\n");
    }

    #[test]
    fn test_preprocess_unbalanced() {
        assert!(preprocess("#ifdef A\nx\n", &defined(&[])).is_err());
        assert!(preprocess("#endif\n", &defined(&[])).is_err());
    }

    #[test]
    fn test_falsy_defines_undefined() {
        let d = Defines::new().with("ZERO", 0u32).with("ONE", 1u32).with("OFF", false).with("ON", true);
        let names = d.defined_names();
        assert!(names.contains("ONE") && names.contains("ON"));
        assert!(!names.contains("ZERO") && !names.contains("OFF"));
        let header = d.header().unwrap();
        assert!(header.contains("const ZERO: u32 = 0u;"));
        assert!(!header.contains("OFF"));
    }

    #[test]
    fn test_compile_and_reflect() {
        let defines = Defines::new().with("COUNT", 3i32);
        let p = ShaderProgram::compile("test", &[PROGRAM], &defines, "vs_main", "fs_main").unwrap();

        assert_eq!(p.attributes().get("position"), Some(&0));
        assert_eq!(p.output_location("color"), Some(0));
        assert_eq!(p.output_location("extra"), Some(1));
        assert_eq!(p.constant_u32("COUNT"), Some(3));

        let block = p.uniform_block("params").unwrap();
        assert_eq!(block.member("scale").unwrap().offset, 0);
        assert_eq!(block.member("tint").unwrap().offset, 16);
        assert_eq!(block.size, 32);

        let names: Vec<&str> = p.bindings().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["params", "color_tex", "color_sampler"]);
        let entries = p.layout_entries(0, BindingHints { unfilterable: &["color_tex"], non_filtering: &["color_sampler"] });
        assert_eq!(entries.len(), 3);
        assert!(matches!(
            entries[1].ty,
            wgpu::BindingType::Texture { sample_type: wgpu::TextureSampleType::Float { filterable: false }, .. }
        ));
    }

    #[test]
    fn test_compile_error_reported() {
        let err = ShaderProgram::compile("broken", &["fn main( {"], &Defines::new(), "vs", "fs").unwrap_err();
        assert!(matches!(err, Error::ShaderCompile { .. }));
    }

    #[test]
    fn test_missing_entry_point_is_link_error() {
        let defines = Defines::new().with("COUNT", 1i32);
        let err = ShaderProgram::compile("test", &[PROGRAM], &defines, "vs_main", "nope").unwrap_err();
        assert!(matches!(err, Error::ShaderLink { .. }));
    }

    #[test]
    fn test_unmatched_varying_is_link_error() {
        let src = r#"
@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }
@fragment fn fs(@location(3) v: vec4<f32>) -> @location(0) vec4<f32> { return v; }
"#;
        let err = ShaderProgram::compile("varying", &[src], &Defines::new(), "vs", "fs").unwrap_err();
        assert!(matches!(err, Error::ShaderLink { .. }));
    }
}
