//! Uniform block layouts, CPU-side block buffers and per-pass uniform channels.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use wgpu::util::DeviceExt;

use crate::util::{Error, Result};

/// Scalar type of a uniform member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    F32,
    I32,
    U32,
}

/// One leaf member of a uniform block, addressed by its dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub kind: UniformKind,
    /// Scalars per element (vec3 = 3, mat4x4 = 16)
    pub components: u32,
    /// Rows of a matrix column, 0 for non-matrices
    pub rows: u32,
    /// Byte stride between matrix columns
    pub column_stride: u32,
    /// Element count, 1 for non-arrays
    pub len: u32,
    pub array_stride: u32,
}

impl UniformMember {
    fn byte_offset(&self, index: usize) -> u32 {
        let c = self.components as usize;
        let (element, comp) = ((index / c) as u32, (index % c) as u32);
        let within = if self.rows > 0 {
            (comp / self.rows) * self.column_stride + (comp % self.rows) * 4
        } else {
            comp * 4
        };
        self.offset + element * self.array_stride + within
    }
}

/// Reflected layout of one `var<uniform>`.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformLayout {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub members: Vec<UniformMember>,
}

impl UniformLayout {
    pub(crate) fn reflect(module: &naga::Module, name: &str, ty: naga::Handle<naga::Type>, group: u32, binding: u32) -> Self {
        let size = module.types[ty].inner.size(module.to_ctx());
        let mut members = Vec::new();
        flatten_type(module, ty, String::new(), 0, &mut members);
        // A bare non-struct uniform is addressed by the variable name
        for m in &mut members {
            if m.name.is_empty() {
                m.name = name.to_string();
            }
        }
        Self { name: name.to_string(), group, binding, size, members }
    }

    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn scalar_kind(scalar: naga::Scalar) -> Option<UniformKind> {
    match scalar.kind {
        naga::ScalarKind::Float if scalar.width == 4 => Some(UniformKind::F32),
        naga::ScalarKind::Sint => Some(UniformKind::I32),
        naga::ScalarKind::Uint | naga::ScalarKind::Bool => Some(UniformKind::U32),
        _ => None,
    }
}

fn flatten_type(module: &naga::Module, ty: naga::Handle<naga::Type>, path: String, offset: u32, out: &mut Vec<UniformMember>) {
    let leaf = |kind, components, rows, column_stride| UniformMember {
        name: path.clone(),
        offset,
        kind,
        components,
        rows,
        column_stride,
        len: 1,
        array_stride: 0,
    };
    match &module.types[ty].inner {
        naga::TypeInner::Scalar(s) => out.extend(scalar_kind(*s).map(|k| leaf(k, 1, 0, 0))),
        naga::TypeInner::Vector { size, scalar } => out.extend(scalar_kind(*scalar).map(|k| leaf(k, *size as u32, 0, 0))),
        naga::TypeInner::Matrix { columns, rows, scalar } => {
            let rows = *rows as u32;
            // vec3 columns are padded to 16 bytes
            let column_stride = if rows == 2 { 8 } else { 16 };
            out.extend(scalar_kind(*scalar).map(|k| leaf(k, *columns as u32 * rows, rows, column_stride)));
        }
        naga::TypeInner::Struct { members, .. } => {
            for m in members {
                let name = m.name.clone().unwrap_or_default();
                flatten_type(module, m.ty, join(&path, &name), offset + m.offset, out);
            }
        }
        naga::TypeInner::Array { base, size: naga::ArraySize::Constant(len), stride } => {
            let len = len.get();
            if matches!(module.types[*base].inner, naga::TypeInner::Struct { .. }) {
                for i in 0..len {
                    flatten_type(module, *base, format!("{path}[{i}]"), offset + i * stride, out);
                }
            } else {
                let mut inner = Vec::new();
                flatten_type(module, *base, path.clone(), offset, &mut inner);
                out.extend(inner.into_iter().map(|m| UniformMember { len, array_stride: *stride, ..m }));
            }
        }
        _ => {}
    }
}

/// Values written to a uniform member, flattened column-major.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    F32(SmallVec<[f32; 16]>),
    I32(SmallVec<[i32; 4]>),
    U32(SmallVec<[u32; 4]>),
}

impl UniformValue {
    pub fn floats(values: &[f32]) -> Self {
        Self::F32(SmallVec::from_slice(values))
    }

    pub fn ints(values: &[i32]) -> Self {
        Self::I32(SmallVec::from_slice(values))
    }

    pub fn uints(values: &[u32]) -> Self {
        Self::U32(SmallVec::from_slice(values))
    }

    fn kind(&self) -> UniformKind {
        match self {
            Self::F32(_) => UniformKind::F32,
            Self::I32(_) => UniformKind::I32,
            Self::U32(_) => UniformKind::U32,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    fn word(&self, i: usize) -> [u8; 4] {
        match self {
            Self::F32(v) => v[i].to_le_bytes(),
            Self::I32(v) => v[i].to_le_bytes(),
            Self::U32(v) => v[i].to_le_bytes(),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::floats(&[v])
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::ints(&[v])
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        Self::uints(&[v])
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::floats(&v.to_array())
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::floats(&v.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::floats(&v.to_array())
    }
}

impl From<Mat3> for UniformValue {
    fn from(m: Mat3) -> Self {
        Self::floats(&m.to_cols_array())
    }
}

impl From<Mat4> for UniformValue {
    fn from(m: Mat4) -> Self {
        Self::floats(&m.to_cols_array())
    }
}

impl From<[i32; 4]> for UniformValue {
    fn from(v: [i32; 4]) -> Self {
        Self::ints(&v)
    }
}

impl From<&[f32]> for UniformValue {
    fn from(v: &[f32]) -> Self {
        Self::floats(v)
    }
}

/// CPU copy of a uniform block, written member by member.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    layout: UniformLayout,
    data: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: UniformLayout) -> Self {
        let data = vec![0u8; layout.size as usize];
        Self { layout, data }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn has(&self, name: &str) -> bool {
        self.layout.member(name).is_some()
    }

    /// Write `value` into member `name`.
    ///
    /// The value count must be a whole number of elements and fit the
    /// member's length; the scalar kind must match.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        let err = |message: String| Error::UniformLayout { block: self.layout.name.clone(), message };
        let member = self.layout.member(name).ok_or_else(|| err(format!("no member '{name}'")))?;

        if member.kind != value.kind() {
            return Err(err(format!("'{name}' is {:?}, got {:?}", member.kind, value.kind())));
        }
        let n = value.len();
        let c = member.components as usize;
        if n == 0 || n % c != 0 {
            return Err(err(format!("'{name}' takes multiples of {c} values, got {n}")));
        }
        if n / c > member.len as usize {
            return Err(err(format!("'{name}' holds {} element(s), got {}", member.len, n / c)));
        }

        for i in 0..n {
            let at = member.byte_offset(i) as usize;
            self.data[at..at + 4].copy_from_slice(&value.word(i));
        }
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn create_buffer(&self, device: &wgpu::Device, label: &str) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &self.data,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }
}

/// Named uniform values staged for one pass and flushed once per draw.
///
/// Names absent from the block are warned about once and ignored.
#[derive(Debug)]
pub struct UniformChannel {
    block: UniformBlock,
    pending: HashMap<String, UniformValue>,
    warned: HashSet<String>,
    dirty: bool,
}

impl UniformChannel {
    pub fn new(block: UniformBlock) -> Self {
        Self { block, pending: HashMap::new(), warned: HashSet::new(), dirty: true }
    }

    pub fn block(&self) -> &UniformBlock {
        &self.block
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) {
        if !self.block.has(name) {
            if self.warned.insert(name.to_string()) {
                warn!(block = %self.block.layout.name, "uniform '{name}' is not used by the shader");
            }
            return;
        }
        self.pending.insert(name.to_string(), value.into());
    }

    /// Write directly into the block, bypassing staging.
    pub fn write(&mut self, f: impl FnOnce(&mut UniformBlock) -> Result<()>) -> Result<()> {
        self.dirty = true;
        f(&mut self.block)
    }

    /// Apply staged values to the block; true when the block changed.
    ///
    /// Every valid value is written even when another fails. The first
    /// failure is returned and the block stays marked dirty.
    pub fn apply(&mut self) -> Result<bool> {
        let mut first_err = None;
        for (name, value) in self.pending.drain() {
            match self.block.set(&name, value) {
                Ok(()) => self.dirty = true,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut self.dirty)),
        }
    }

    /// Apply staged values and upload the block if anything changed.
    pub fn flush(&mut self, queue: &wgpu::Queue, buffer: &wgpu::Buffer) -> Result<()> {
        if self.apply()? {
            queue.write_buffer(buffer, 0, self.block.bytes());
        }
        Ok(())
    }
}
