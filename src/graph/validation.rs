//! Diagnostics about the graph itself: hazards, elided barriers, aliasing, and misuse.
//!
//! Messages go to a user callback when one is installed, and to `tracing` otherwise.

use std::cell::RefCell;

use ash::vk::{DebugUtilsMessageSeverityFlagsEXT as Severity, DebugUtilsMessageTypeFlagsEXT as Category};
use tracing::{debug, error, info, warn};

#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum ObjectKind {
	Stage,
	Resource,
	Group,
}

/// A graph object a message is about, identified by its index in the build.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct ObjectRef {
	pub kind: ObjectKind,
	pub index: usize,
	pub name: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
	pub severity: Severity,
	pub category: Category,
	pub message: String,
	pub objects: Vec<ObjectRef>,
}

impl Message {
	pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
		Self {
			severity,
			category,
			message: message.into(),
			objects: Vec::new(),
		}
	}

	pub fn error(message: impl Into<String>) -> Self { Self::new(Severity::ERROR, Category::VALIDATION, message) }

	pub fn warning(message: impl Into<String>) -> Self { Self::new(Severity::WARNING, Category::VALIDATION, message) }

	pub fn performance(message: impl Into<String>) -> Self {
		Self::new(Severity::INFO, Category::PERFORMANCE, message)
	}

	pub fn verbose(message: impl Into<String>) -> Self { Self::new(Severity::VERBOSE, Category::GENERAL, message) }

	pub fn object(mut self, kind: ObjectKind, index: usize, name: &str) -> Self {
		self.objects.push(ObjectRef {
			kind,
			index,
			name: name.to_string(),
		});
		self
	}

	pub fn stage(self, index: usize, name: &str) -> Self { self.object(ObjectKind::Stage, index, name) }

	pub fn resource(self, index: usize, name: &str) -> Self { self.object(ObjectKind::Resource, index, name) }

	pub fn group(self, index: usize, name: &str) -> Self { self.object(ObjectKind::Group, index, name) }
}

pub type ValidationCallback = Box<dyn FnMut(&Message)>;

struct Sink {
	severity: Severity,
	category: Category,
	callback: ValidationCallback,
}

#[derive(Default)]
pub(crate) struct Validator {
	sink: RefCell<Option<Sink>>,
}

impl Validator {
	pub fn set(&mut self, severity: Severity, category: Category, callback: ValidationCallback) {
		*self.sink.get_mut() = Some(Sink {
			severity,
			category,
			callback,
		});
	}

	pub fn clear(&mut self) { *self.sink.get_mut() = None; }

	pub fn emit(&self, message: Message) {
		if let Some(sink) = self.sink.borrow_mut().as_mut() {
			if sink.severity.intersects(message.severity) && sink.category.intersects(message.category) {
				(sink.callback)(&message);
			}
			return;
		}

		let objects = message.objects.iter().map(|o| o.name.as_str()).collect::<Vec<_>>();
		if message.severity.contains(Severity::ERROR) {
			error!(objects = ?objects, "{}", message.message);
		} else if message.severity.contains(Severity::WARNING) {
			warn!(objects = ?objects, "{}", message.message);
		} else if message.severity.contains(Severity::INFO) {
			info!(objects = ?objects, "{}", message.message);
		} else {
			debug!(objects = ?objects, "{}", message.message);
		}
	}
}
