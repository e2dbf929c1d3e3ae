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

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # preeval
//!
//! A heap and value abstract interpreter that pre-evaluates SSA programs ahead of
//! allocation-sensitive optimizations.
//!
//! `preeval` simulates a function over abstract values: integers tracked exactly, as ranges
//! or as known bits, pointers tracked as sets of addresses into abstract heap objects. Loops
//! are iterated to a fixpoint with widening, calls are entered with their own frames, and
//! whatever cannot be simulated within the configured budget is approximated soundly.
//!
//! ## Features
//!
//! - **Escape analysis** - which allocation sites never outlive the frame that created them
//! - **Value facts** - the joined value of every instruction, for constant folding
//! - **Function summaries** - return values and reachable memory per function and arguments
//! - **Bounded cost** - step and wall-clock budgets, loop iteration caps, call depth limits
//! - **Parallel** - independent root functions are analyzed on the rayon thread pool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use preeval::prelude::*;
//!
//! let mut pb = ProgramBuilder::new();
//! let main = pb.declare("main", &[], Some(Type::I64));
//! let mut fb = pb.function(main)?;
//! let obj = fb.alloc(None, true);
//! let v = fb.iconst(Type::I64, 42);
//! fb.store(obj, v);
//! let back = fb.load(Type::I64, obj);
//! fb.ret(Some(back));
//! pb.define(fb)?;
//! let program = pb.build()?;
//!
//! let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default())?;
//! let analysis = evaluator.analyze(main, vec![])?;
//! assert_eq!(analysis.root_summary().unwrap().return_value(), &AbstractValue::Integer(42));
//! assert_eq!(analysis.escapes().escapes(AllocSite::Heap(main, obj)), Some(false));
//! # Ok::<(), preeval::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the program graph the evaluator consumes, and a builder for it
//! - [`analysis`] - the abstract domains, the heap model and the [`Evaluator`]
//! - [`compiler`] - parallel scheduling of many analyses over one program
//! - [`utils`] - bit sets and the graph algorithms behind the evaluation order
//! - [`Error`] and [`Result`] - error handling

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,ignore
/// use preeval::prelude::*;
///
/// let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::fast())?;
/// ```
pub mod prelude;

pub mod analysis;
pub mod compiler;
pub mod ir;
pub mod utils;

/// `preeval` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `preeval` Error type
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::{Error, EvalConfig};
///
/// match EvalConfig::default().with_step_budget(0).validate() {
///     Err(Error::InvalidConfig(reason)) => println!("rejected: {reason}"),
///     other => println!("{other:?}"),
/// }
/// ```
pub use error::Error;

pub use analysis::{Analysis, EvalConfig, Evaluator, NoOracle, PointsToOracle, StaticOracle};
pub use compiler::AnalysisScheduler;
