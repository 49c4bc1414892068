// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! # dotforge
//!
//! Builds minimal managed PE images from ECMA-335 metadata and CIL method bodies, and loads
//! them back the way a CLI host would.
//!
//! The crate covers the whole path from an empty set of heaps to a file a runtime accepts:
//!
//! - [`metadata`] - Heaps, tables, signatures and method body headers, plus readers for them
//! - [`assembly`] - The CIL instruction subset, its encoder and decoder
//! - [`cilassembly`] - The metadata builder, the image assembler and the sample class library
//! - [`runtime`] - Loading images and invoking methods through reflection style steps
//! - [`file`] - PE input and the owned header structures the writer emits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dotforge::prelude::*;
//! use std::path::Path;
//!
//! let image = LibraryBuilder::default().build(&LibrarySpec::default())?;
//! image.write_to_file("SampleLib.dll")?;
//!
//! let invocation = run_method(
//!     &ReferenceRuntime::new(),
//!     Path::new("SampleLib.dll"),
//!     "SampleLib.TestClass",
//!     "TestMethod",
//! )?;
//! assert_eq!(invocation.output, vec![DEFAULT_MESSAGE.to_string()]);
//! # Ok::<(), dotforge::Error>(())
//! ```

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub(crate) mod error;

pub mod assembly;
pub mod cilassembly;
pub mod file;
pub mod metadata;
pub mod prelude;
pub mod runtime;
pub mod utils;

/// The result type used throughout dotforge
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use file::{parser::Parser, File};
pub use metadata::cilimage::CilImage;
