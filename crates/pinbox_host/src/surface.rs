//! Host surface handle table
//!
//! The module never sees host objects directly. It holds integer handles
//! into this table, each naming a tagged value, a plain property bag, or a
//! document element. Handle 0 is null; the window and document body are
//! pre-seeded and cannot be released.
//!
//! Plain objects and boxed values created while the module is running are
//! scratch: once the host call that created them returns, any that nothing
//! live refers to are freed, the way a script engine collects temporaries.
//! A module that wants to keep one across calls attaches it to a live
//! object, such as the window.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    #[error("handle {0} does not carry properties")]
    NotAnObject(Handle),

    #[error("handle {0} is not an element")]
    NotAnElement(Handle),

    #[error("handle {0} is not a canvas")]
    NotACanvas(Handle),

    #[error("handle {0} is not a drawing context")]
    NotAContext(Handle),

    #[error("handle {0} is reserved")]
    Reserved(Handle),

    #[error("appending {child} under {parent} would create a cycle")]
    Cycle { parent: Handle, child: Handle },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(0);
    pub const WINDOW: Handle = Handle(1);
    pub const BODY: Handle = Handle(2);

    const FIRST_FREE: u32 = 3;

    pub fn from_raw(raw: u32) -> Handle {
        Handle(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self == Handle::NULL
    }

    fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_FREE
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tagged scalar held by a handle or stored as a property.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ref(Handle),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String form, the way a script console would print it.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Ref(h) => format!("[object {h}]"),
        }
    }
}

pub type Props = BTreeMap<String, Value>;

/// Draw calls a 2D context keeps before dropping the oldest.
pub const MAX_DRAW_COMMANDS: usize = 4096;

const CANVAS_WIDTH: f64 = 300.0;
const CANVAS_HEIGHT: f64 = 150.0;

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub namespace: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<Handle>,
    pub parent: Option<Handle>,
    pub props: Props,
    /// Pointer ids captured by this element.
    pub captures: BTreeSet<i32>,
    style: Option<Handle>,
    context: Option<Handle>,
}

/// One recorded call against a 2D drawing context, with the style that was
/// current when it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        style: String,
    },
    ClearRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    FillText {
        text: String,
        x: f32,
        y: f32,
        style: String,
        font: String,
    },
}

#[derive(Debug, Clone)]
pub struct Context2d {
    pub canvas: Handle,
    pub kind: String,
    /// Options the context was requested with.
    pub attributes: Props,
    /// `fillStyle`, `font` and anything else the module sets.
    pub props: Props,
    pub commands: VecDeque<DrawCommand>,
}

impl Context2d {
    fn style(&self, name: &str, default: &str) -> String {
        self.props
            .get(name)
            .map(Value::to_display_string)
            .unwrap_or_else(|| default.to_string())
    }

    fn record(&mut self, command: DrawCommand) {
        if self.commands.len() == MAX_DRAW_COMMANDS {
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }
}

#[derive(Debug, Clone)]
pub enum Entry {
    Value(Value),
    Object(Props),
    Element(Element),
    Context(Context2d),
}

impl Entry {
    /// Handles this entry keeps alive.
    fn refs(&self, out: &mut Vec<Handle>) {
        let props = match self {
            Entry::Value(_) => return,
            Entry::Object(props) => props,
            Entry::Element(e) => {
                out.extend(e.style);
                out.extend(e.context);
                &e.props
            }
            Entry::Context(c) => {
                out.push(c.canvas);
                out.extend(c.attributes.values().filter_map(as_ref));
                &c.props
            }
        };
        out.extend(props.values().filter_map(as_ref));
    }
}

fn as_ref(value: &Value) -> Option<Handle> {
    match value {
        Value::Ref(h) => Some(*h),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Surface {
    entries: HashMap<Handle, Entry>,
    next: u32,
    /// Scratch handles created since [`Surface::begin_scope`].
    scratch: Option<Vec<Handle>>,
}

impl Surface {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(Handle::WINDOW, Entry::Object(Props::new()));
        entries.insert(
            Handle::BODY,
            Entry::Element(Element {
                tag: "body".to_string(),
                ..Default::default()
            }),
        );
        Self {
            entries,
            next: Handle::FIRST_FREE,
            scratch: None,
        }
    }

    fn insert(&mut self, entry: Entry) -> Handle {
        let handle = Handle(self.next);
        self.next = self.next.wrapping_add(1).max(Handle::FIRST_FREE);
        if let (Some(scratch), Entry::Value(_) | Entry::Object(_)) = (self.scratch.as_mut(), &entry) {
            scratch.push(handle);
        }
        self.entries.insert(handle, entry);
        handle
    }

    /// Start tracking scratch handles for one call into the module.
    pub fn begin_scope(&mut self) {
        if self.scratch.replace(Vec::new()).is_some() {
            tracing::warn!("scratch scope reopened; earlier scratch handles kept");
        }
    }

    /// Free scratch handles created since [`Surface::begin_scope`] that are
    /// not reachable from `roots` or from any entry that outlives the scope.
    /// Returns how many were freed.
    pub fn end_scope(&mut self, roots: impl IntoIterator<Item = Handle>) -> usize {
        let Some(scratch) = self.scratch.take() else {
            return 0;
        };
        let mut unreached: HashSet<Handle> = scratch
            .into_iter()
            .filter(|h| self.entries.contains_key(h))
            .collect();
        if unreached.is_empty() {
            return 0;
        }

        let mut pending: Vec<Handle> = roots.into_iter().collect();
        for (handle, entry) in &self.entries {
            if !unreached.contains(handle) {
                entry.refs(&mut pending);
            }
        }
        while let Some(handle) = pending.pop() {
            if unreached.remove(&handle) {
                if let Some(entry) = self.entries.get(&handle) {
                    entry.refs(&mut pending);
                }
            }
        }

        for handle in &unreached {
            self.entries.remove(handle);
        }
        if !unreached.is_empty() {
            tracing::trace!(freed = unreached.len(), live = self.entries.len(), "scratch handles freed");
        }
        unreached.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        handle.is_null() || self.entries.contains_key(&handle)
    }

    pub fn get(&self, handle: Handle) -> Result<&Entry, SurfaceError> {
        self.entries
            .get(&handle)
            .ok_or(SurfaceError::InvalidHandle(handle))
    }

    pub fn object(&mut self) -> Handle {
        self.insert(Entry::Object(Props::new()))
    }

    /// Build an object from key/value pairs.
    pub fn object_from<I, K>(&mut self, props: I) -> Handle
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let props = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.insert(Entry::Object(props))
    }

    /// Box a value behind a fresh handle. Refs and null collapse to the
    /// handle they already name.
    pub fn value(&mut self, value: Value) -> Handle {
        match value {
            Value::Null => Handle::NULL,
            Value::Ref(h) => h,
            other => self.insert(Entry::Value(other)),
        }
    }

    /// The value a handle stands for when stored as a property.
    pub fn as_value(&self, handle: Handle) -> Result<Value, SurfaceError> {
        if handle.is_null() {
            return Ok(Value::Null);
        }
        match self.get(handle)? {
            Entry::Value(v) => Ok(v.clone()),
            Entry::Object(_) | Entry::Element(_) | Entry::Context(_) => Ok(Value::Ref(handle)),
        }
    }

    pub fn release(&mut self, handle: Handle) -> Result<(), SurfaceError> {
        if handle.is_null() {
            return Ok(());
        }
        if handle.is_reserved() {
            return Err(SurfaceError::Reserved(handle));
        }
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(SurfaceError::InvalidHandle(handle))?;
        // A released element leaves the tree; its children stay addressable.
        if let Entry::Element(element) = entry {
            if let Some(context) = element.context {
                self.entries.remove(&context);
            }
            if let Some(parent) = element.parent {
                self.unlink_child(parent, handle);
            }
            for child in element.children {
                if let Ok(c) = self.element_mut(child) {
                    c.parent = None;
                }
            }
        }
        Ok(())
    }

    fn props(&self, handle: Handle) -> Result<&Props, SurfaceError> {
        match self.get(handle)? {
            Entry::Object(p) => Ok(p),
            Entry::Element(e) => Ok(&e.props),
            Entry::Context(c) => Ok(&c.props),
            Entry::Value(_) => Err(SurfaceError::NotAnObject(handle)),
        }
    }

    fn props_mut(&mut self, handle: Handle) -> Result<&mut Props, SurfaceError> {
        match self.entries.get_mut(&handle) {
            Some(Entry::Object(p)) => Ok(p),
            Some(Entry::Element(e)) => Ok(&mut e.props),
            Some(Entry::Context(c)) => Ok(&mut c.props),
            Some(Entry::Value(_)) => Err(SurfaceError::NotAnObject(handle)),
            None => Err(SurfaceError::InvalidHandle(handle)),
        }
    }

    pub fn set(&mut self, handle: Handle, name: &str, value: Value) -> Result<(), SurfaceError> {
        self.props_mut(handle)?.insert(name.to_string(), value);
        Ok(())
    }

    /// Missing properties read as [`Value::Null`].
    pub fn property(&self, handle: Handle, name: &str) -> Result<Value, SurfaceError> {
        Ok(self.props(handle)?.get(name).cloned().unwrap_or(Value::Null))
    }

    pub fn element(&self, handle: Handle) -> Result<&Element, SurfaceError> {
        match self.get(handle)? {
            Entry::Element(e) => Ok(e),
            _ => Err(SurfaceError::NotAnElement(handle)),
        }
    }

    fn element_mut(&mut self, handle: Handle) -> Result<&mut Element, SurfaceError> {
        match self.entries.get_mut(&handle) {
            Some(Entry::Element(e)) => Ok(e),
            Some(_) => Err(SurfaceError::NotAnElement(handle)),
            None => Err(SurfaceError::InvalidHandle(handle)),
        }
    }

    pub fn create_element(&mut self, tag: &str, namespace: Option<&str>) -> Handle {
        self.insert(Entry::Element(Element {
            tag: tag.to_string(),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        }))
    }

    /// Attach `child` as the last child of `parent`, moving it if it already
    /// has a parent.
    pub fn append_child(&mut self, parent: Handle, child: Handle) -> Result<Handle, SurfaceError> {
        self.element(child)?;
        self.element(parent)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(SurfaceError::Cycle { parent, child });
        }
        self.detach(child)?;
        self.element_mut(parent)?.children.push(child);
        self.element_mut(child)?.parent = Some(parent);
        Ok(child)
    }

    /// Detach an element from its parent. Detached elements are harmless.
    pub fn detach(&mut self, handle: Handle) -> Result<(), SurfaceError> {
        if let Some(parent) = self.element_mut(handle)?.parent.take() {
            self.unlink_child(parent, handle);
        }
        Ok(())
    }

    fn unlink_child(&mut self, parent: Handle, child: Handle) {
        if let Ok(p) = self.element_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: Handle, mut node: Handle) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.element(node).ok().and_then(|e| e.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    pub fn set_attribute(&mut self, handle: Handle, name: &str, value: &str) -> Result<(), SurfaceError> {
        self.element_mut(handle)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// First element attached under the document body whose `id` attribute
    /// matches, in tree order.
    pub fn element_by_id(&self, id: &str) -> Option<Handle> {
        let mut stack = vec![Handle::BODY];
        while let Some(handle) = stack.pop() {
            let Ok(element) = self.element(handle) else {
                continue;
            };
            if handle != Handle::BODY && element.attributes.get("id").map(String::as_str) == Some(id) {
                return Some(handle);
            }
            stack.extend(element.children.iter().rev());
        }
        None
    }

    /// Style object for an element, created on first request and stable
    /// afterwards.
    pub fn computed_style(&mut self, handle: Handle) -> Result<Handle, SurfaceError> {
        if let Some(style) = self.element(handle)?.style {
            if self.entries.contains_key(&style) {
                return Ok(style);
            }
        }
        let style = self.object();
        self.element_mut(handle)?.style = Some(style);
        Ok(style)
    }

    pub fn set_pointer_capture(&mut self, handle: Handle, pointer: i32, captured: bool) -> Result<(), SurfaceError> {
        let element = self.element_mut(handle)?;
        if captured {
            element.captures.insert(pointer);
        } else {
            element.captures.remove(&pointer);
        }
        Ok(())
    }

    /// Drawing context of a canvas element. The first request fixes the
    /// context kind; asking again for the same kind returns the same
    /// context and asking for another kind yields null.
    pub fn context(&mut self, canvas: Handle, kind: &str, options: Handle) -> Result<Handle, SurfaceError> {
        let element = self.element(canvas)?;
        if !element.tag.eq_ignore_ascii_case("canvas") {
            return Err(SurfaceError::NotACanvas(canvas));
        }
        if let Some(existing) = element.context.filter(|h| self.entries.contains_key(h)) {
            return Ok(match self.get(existing) {
                Ok(Entry::Context(c)) if c.kind == kind => existing,
                _ => Handle::NULL,
            });
        }
        let attributes = if options.is_null() {
            Props::new()
        } else {
            self.props(options)?.clone()
        };
        let context = self.insert(Entry::Context(Context2d {
            canvas,
            kind: kind.to_string(),
            attributes,
            props: Props::new(),
            commands: VecDeque::new(),
        }));
        self.element_mut(canvas)?.context = Some(context);
        Ok(context)
    }

    pub fn context_2d(&self, handle: Handle) -> Result<&Context2d, SurfaceError> {
        match self.get(handle)? {
            Entry::Context(c) => Ok(c),
            _ => Err(SurfaceError::NotAContext(handle)),
        }
    }

    fn context_mut(&mut self, handle: Handle) -> Result<&mut Context2d, SurfaceError> {
        match self.entries.get_mut(&handle) {
            Some(Entry::Context(c)) => Ok(c),
            Some(_) => Err(SurfaceError::NotAContext(handle)),
            None => Err(SurfaceError::InvalidHandle(handle)),
        }
    }

    /// Size of the canvas behind a context, from its `width`/`height`
    /// properties or the element defaults.
    fn canvas_size(&self, canvas: Handle) -> (f64, f64) {
        let dimension = |name: &str, default: f64| {
            self.property(canvas, name)
                .ok()
                .and_then(|v| v.as_number())
                .unwrap_or(default)
        };
        (dimension("width", CANVAS_WIDTH), dimension("height", CANVAS_HEIGHT))
    }

    pub fn fill_rect(&mut self, handle: Handle, x: f32, y: f32, width: f32, height: f32) -> Result<(), SurfaceError> {
        let context = self.context_mut(handle)?;
        let style = context.style("fillStyle", "#000000");
        context.record(DrawCommand::FillRect {
            x,
            y,
            width,
            height,
            style,
        });
        Ok(())
    }

    /// Record a clear. A clear covering the whole canvas also discards
    /// everything recorded before it.
    pub fn clear_rect(&mut self, handle: Handle, x: f32, y: f32, width: f32, height: f32) -> Result<(), SurfaceError> {
        let canvas = self.context_2d(handle)?.canvas;
        let (cw, ch) = self.canvas_size(canvas);
        let context = self.context_mut(handle)?;
        let covers = x <= 0.0 && y <= 0.0 && (x + width) as f64 >= cw && (y + height) as f64 >= ch;
        if covers {
            context.commands.clear();
        }
        context.record(DrawCommand::ClearRect { x, y, width, height });
        Ok(())
    }

    pub fn fill_text(&mut self, handle: Handle, text: &str, x: f32, y: f32) -> Result<(), SurfaceError> {
        let context = self.context_mut(handle)?;
        let style = context.style("fillStyle", "#000000");
        let font = context.style("font", "10px sans-serif");
        context.record(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
            style,
            font,
        });
        Ok(())
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}
