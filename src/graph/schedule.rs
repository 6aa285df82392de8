use crate::{
	device::{QueueType, Queues},
	graph::sync::QueueLink,
};

/// A run of stages on one queue, submitted together.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct Batch {
	pub queue: QueueType,
	pub stages: Vec<usize>,
	/// Stages recorded into the same command buffer, tagged with the queue whose pool records them.
	pub lists: Vec<(QueueType, Vec<usize>)>,
	/// Earlier batches on other queues that must finish first.
	pub waits: Vec<usize>,
}

/// Batches in submission order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Schedule {
	pub batches: Vec<Batch>,
	pub stage_batch: Vec<usize>,
}

struct Scheduler {
	building: Vec<Batch>,
	open: Queues<Option<usize>>,
	closed: Vec<usize>,
}

impl Scheduler {
	fn close(&mut self, queue: QueueType) {
		if let Some(batch) = self.open[queue].take() {
			self.closed.push(batch);
		}
	}
}

/// Splits the ordered stages into batches, ending a batch wherever another queue has to wait on it.
pub(crate) fn schedule(
	order: &[usize], queue: impl Fn(usize) -> QueueType, commands_queue: impl Fn(usize) -> QueueType,
	links: &[QueueLink],
) -> Schedule {
	let mut s = Scheduler {
		building: Vec::new(),
		open: Queues::default(),
		closed: Vec::new(),
	};
	let mut stage_batch = vec![usize::MAX; order.iter().max().map_or(0, |&m| m + 1)];

	for &stage in order {
		let q = queue(stage);

		let mut waits = Vec::new();
		for link in links.iter().filter(|l| l.consumer == stage) {
			let producer = stage_batch[link.producer];
			let pq = s.building[producer].queue;
			if pq == q {
				continue;
			}
			if s.open[pq] == Some(producer) {
				s.close(pq);
			}
			if !waits.contains(&producer) {
				waits.push(producer);
			}
		}

		if !waits.is_empty() {
			if let Some(current) = s.open[q] {
				if !s.building[current].stages.is_empty() {
					s.close(q);
				}
			}
		}

		let batch = match s.open[q] {
			Some(batch) => batch,
			None => {
				s.building.push(Batch {
					queue: q,
					stages: Vec::new(),
					lists: Vec::new(),
					waits: Vec::new(),
				});
				let batch = s.building.len() - 1;
				s.open[q] = Some(batch);
				batch
			},
		};

		let b = &mut s.building[batch];
		b.stages.push(stage);
		let pool = commands_queue(stage);
		match b.lists.last_mut() {
			Some((last, stages)) if *last == pool => stages.push(stage),
			_ => b.lists.push((pool, vec![stage])),
		}
		for wait in waits {
			if !b.waits.contains(&wait) {
				b.waits.push(wait);
			}
		}
		stage_batch[stage] = batch;
	}

	let mut leftover: Vec<_> = QueueType::ALL.iter().filter_map(|&q| s.open[q]).collect();
	leftover.sort_unstable();
	s.closed.extend(leftover);

	// Renumber in submission order.
	let mut remap = vec![0; s.building.len()];
	for (new, &old) in s.closed.iter().enumerate() {
		remap[old] = new;
	}
	let mut batches: Vec<_> = s
		.closed
		.iter()
		.map(|&old| {
			let mut batch = s.building[old].clone();
			for wait in batch.waits.iter_mut() {
				*wait = remap[*wait];
			}
			batch
		})
		.collect();
	for batch in batches.iter_mut() {
		batch.waits.sort_unstable();
	}
	for b in stage_batch.iter_mut().filter(|b| **b != usize::MAX) {
		*b = remap[*b];
	}

	Schedule { batches, stage_batch }
}
