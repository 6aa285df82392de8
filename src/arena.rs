use std::{
	fmt,
	hash::{Hash, Hasher},
	marker::PhantomData,
};

use crate::{Error, Result};

/// A generation-checked index into an [`Arena`].
pub struct Id<T> {
	index: u32,
	generation: u32,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
	fn new(index: u32, generation: u32) -> Self {
		Self {
			index,
			generation,
			_marker: PhantomData,
		}
	}

	pub fn index(self) -> usize { self.index as usize }

	pub fn generation(self) -> u32 { self.generation }
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
	fn clone(&self) -> Self { *self }
}

impl<T> PartialEq for Id<T> {
	fn eq(&self, other: &Self) -> bool { self.index == other.index && self.generation == other.generation }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.index.hash(state);
		self.generation.hash(state);
	}
}

impl<T> fmt::Debug for Id<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Id({}v{})", self.index, self.generation) }
}

/// An append-only arena whose handles are only valid for a single generation.
///
/// Graph builders draw a fresh generation for every build, so a handle kept around from a previous build (or
/// borrowed from another graph) fails with [`Error::StaleHandle`] instead of aliasing something else.
pub struct Arena<T> {
	items: Vec<T>,
	generation: u32,
}

impl<T> Arena<T> {
	pub fn new(generation: u32) -> Self {
		Self {
			items: Vec::new(),
			generation,
		}
	}

	pub fn len(&self) -> usize { self.items.len() }

	pub fn is_empty(&self) -> bool { self.items.is_empty() }

	pub fn push(&mut self, item: T) -> Id<T> {
		let index = self.items.len() as u32;
		self.items.push(item);
		Id::new(index, self.generation)
	}

	pub fn get(&self, id: Id<T>) -> Result<&T> {
		let index = self.check(id)?;
		Ok(&self.items[index])
	}

	pub fn get_mut(&mut self, id: Id<T>) -> Result<&mut T> {
		let index = self.check(id)?;
		Ok(&mut self.items[index])
	}

	/// The id of the item at `index`, if there is one.
	pub fn id(&self, index: usize) -> Option<Id<T>> {
		(index < self.items.len()).then(|| Id::new(index as u32, self.generation))
	}

	pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> + '_ {
		let generation = self.generation;
		self.items
			.iter()
			.enumerate()
			.map(move |(i, item)| (Id::new(i as u32, generation), item))
	}

	pub fn as_slice(&self) -> &[T] { &self.items }

	fn check(&self, id: Id<T>) -> Result<usize> {
		if id.generation != self.generation || id.index as usize >= self.items.len() {
			return Err(Error::StaleHandle);
		}
		Ok(id.index as usize)
	}
}
