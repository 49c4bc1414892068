//! Loading images and invoking their methods, the way a managed host does with reflection.
//!
//! The capability is split along the steps a reflection caller goes through:
//!
//! - [`RuntimeLoader::load`] - load an image from a path (`Assembly.LoadFile`)
//! - [`LoadedModule::resolve_type`] - find a type by namespace qualified name (`GetType`)
//! - [`RuntimeType::find_method`] - find a public method by name (`GetMethod`)
//! - [`RuntimeType::construct`] - run the parameterless constructor (`Activator.CreateInstance`)
//! - [`RuntimeInstance::invoke`] - call a method on the instance (`MethodInfo.Invoke`)
//!
//! Two implementations exist: [`ReferenceRuntime`] validates and interprets the image in
//! process, [`HostRuntime`] drives an installed Mono or .NET toolchain. Failures keep the
//! distinction a host sees: [`crate::Error::LoadRejected`] for an image the loader refuses,
//! [`crate::Error::TypeNotFound`] and [`crate::Error::MethodNotFound`] for failed lookups, and
//! [`crate::Error::InvocationFailed`] for code that threw once it ran.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotforge::runtime::{run_method, ReferenceRuntime};
//! use std::path::Path;
//!
//! let invocation = run_method(
//!     &ReferenceRuntime::new(),
//!     Path::new("SampleLib.dll"),
//!     "SampleLib.TestClass",
//!     "TestMethod",
//! )?;
//! for line in &invocation.output {
//!     println!("{}", line);
//! }
//! # Ok::<(), dotforge::Error>(())
//! ```

mod host;
mod reference;

pub use host::{
    parse_harness_output, HostInstance, HostModule, HostRuntime, HostType, Toolchain,
    HARNESS_SOURCE, MARKER_VARIABLE,
};
pub use reference::{ReferenceInstance, ReferenceModule, ReferenceRuntime, ReferenceType};

use std::path::Path;

use crate::{metadata::token::Token, Result};

/// A value on the evaluation stack or returned from a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The null reference
    Null,
    /// A string
    String(String),
    /// An instance of the named type
    Object(String),
}

/// A method found by [`RuntimeType::find_method`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHandle {
    /// Qualified name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// `MethodDef` token, when the runtime exposes one
    pub token: Option<Token>,
}

/// What one invocation produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    /// Lines written to the console, in order
    pub output: Vec<String>,
    /// Return value, `None` for `void` methods
    pub value: Option<Value>,
}

/// Loads images
pub trait RuntimeLoader {
    /// The loaded image
    type Module: LoadedModule;

    /// Load the image at `path`
    ///
    /// # Errors
    /// Returns [`crate::Error::LoadRejected`] carrying the loader's diagnostic when the image is
    /// refused, or [`crate::Error::FileError`] if it can't be read.
    fn load(&self, path: &Path) -> Result<Self::Module>;
}

/// A loaded image
pub trait LoadedModule {
    /// A type of the image
    type Type: RuntimeType;

    /// Resolve a type by its namespace qualified name, e.g. `SampleLib.TestClass`
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if no such type is defined.
    fn resolve_type(&self, name: &str) -> Result<Self::Type>;
}

/// A resolved type
pub trait RuntimeType {
    /// An instance of the type
    type Instance: RuntimeInstance;

    /// Qualified name of the type
    fn name(&self) -> &str;

    /// Find a public method by name
    ///
    /// # Errors
    /// Returns [`crate::Error::MethodNotFound`] if the type declares no such method.
    fn find_method(&self, name: &str) -> Result<MethodHandle>;

    /// Create an instance with the parameterless constructor
    ///
    /// # Errors
    /// Returns [`crate::Error::MethodNotFound`] without a parameterless constructor, or
    /// [`crate::Error::InvocationFailed`] if the constructor throws.
    fn construct(&self) -> Result<Self::Instance>;
}

/// An instance created by [`RuntimeType::construct`]
pub trait RuntimeInstance {
    /// Call `method` on this instance without arguments
    ///
    /// # Errors
    /// Returns [`crate::Error::InvocationFailed`] if the call throws.
    fn invoke(&mut self, method: &MethodHandle) -> Result<Invocation>;
}

/// Load `path`, resolve `type_name`, construct it and invoke `method_name`
///
/// # Errors
/// Returns the error of the first step that fails.
pub fn run_method<L: RuntimeLoader>(
    loader: &L,
    path: &Path,
    type_name: &str,
    method_name: &str,
) -> Result<Invocation> {
    let module = loader.load(path)?;
    let resolved = module.resolve_type(type_name)?;
    let method = resolved.find_method(method_name)?;
    let mut instance = resolved.construct()?;
    instance.invoke(&method)
}
