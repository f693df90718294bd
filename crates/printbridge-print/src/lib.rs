// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printbridge Print: delivers sanitized receipt text to a named printer.
//
// The delivery strategy is picked once when the dispatcher is built. The OS
// facing work (spooler, scripting bridge, off-screen renderer, printer
// enumeration) sits behind the `PrintHost` trait so the dispatcher's timeout
// and completion rules can be exercised without a printer.

pub mod completion;
pub mod dispatcher;
pub mod host;
pub mod printers;
pub mod render;
pub mod sanitize;
pub mod test_page;

pub use completion::{Completion, WeakCompletion};
pub use dispatcher::{DispatchTimeouts, PrintDispatcher, PrintService};
pub use host::{PrintHost, RenderRequest, SystemHost};
pub use printbridge_core::config::DeliveryStrategy;
pub use sanitize::{SanitizeMode, sanitize};
