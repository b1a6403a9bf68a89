//! In-process SPMD runtime: one thread per rank.
//!
//! [`ThreadComm::run`] starts `size` threads that each execute the same
//! closure with their own communicator, the way `mpirun` starts processes.
//! Collectives rendezvous on a shared round: every rank deposits its
//! contribution, the last one publishes the full set, and each rank reduces
//! the published contributions in rank order. The reduction order never
//! depends on thread timing, so every rank gets the same bits.
//!
//! A rank that issues a different collective than its peers, or leaves the
//! run while peers still wait on it, poisons the round: every rank panics
//! with a `collective mismatch` message and `run` re-raises the panic of the
//! rank that caused it.

use super::Comm;
use crate::error::KError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct Round {
    generation: u64,
    /// Operation and payload length of the collective in progress.
    op: Option<(&'static str, usize)>,
    slots: Vec<Option<Vec<f64>>>,
    arrived: usize,
    published: Arc<Vec<Vec<f64>>>,
    exited: Vec<bool>,
    poisoned: Option<String>,
    culprit: Option<usize>,
    mail: HashMap<(usize, usize), VecDeque<Vec<f64>>>,
}

struct Shared {
    size: usize,
    state: Mutex<Round>,
    cvar: Condvar,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(Round {
                generation: 0,
                op: None,
                slots: vec![None; size],
                arrived: 0,
                published: Arc::new(Vec::new()),
                exited: vec![false; size],
                poisoned: None,
                culprit: None,
                mail: HashMap::new(),
            }),
            cvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Round> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'g>(&self, guard: MutexGuard<'g, Round>) -> MutexGuard<'g, Round> {
        self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Communicator handed to each rank by [`ThreadComm::run`].
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

/// Marks a rank as gone when its closure returns or unwinds.
struct ExitGuard {
    rank: usize,
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut st = self.shared.lock();
        st.exited[self.rank] = true;
        if std::thread::panicking() && st.poisoned.is_none() {
            st.poisoned = Some(format!("rank {} panicked", self.rank));
            st.culprit = Some(self.rank);
        }
        self.shared.cvar.notify_all();
    }
}

impl ThreadComm {
    /// Run `f` on `size` ranks and return the per-rank results in rank order.
    ///
    /// # Panics
    /// Re-raises the panic of the first failing rank, including collective
    /// mismatches.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(&ThreadComm) -> R + Sync,
        R: Send,
    {
        assert!(size > 0, "ThreadComm::run needs at least one rank");
        let shared = Arc::new(Shared::new(size));
        let joined: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = ThreadComm { rank, shared: Arc::clone(&shared) };
                    let f = &f;
                    s.spawn(move || {
                        let _exit = ExitGuard { rank, shared: Arc::clone(&comm.shared) };
                        f(&comm)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let culprit = shared.lock().culprit;
        let mut results = Vec::with_capacity(size);
        let mut failed = Vec::new();
        for (rank, outcome) in joined.into_iter().enumerate() {
            match outcome {
                Ok(r) => results.push(r),
                Err(payload) => failed.push((rank, payload)),
            }
        }
        if !failed.is_empty() {
            let idx = failed.iter().position(|(r, _)| Some(*r) == culprit).unwrap_or(0);
            let (_, payload) = failed.swap_remove(idx);
            std::panic::resume_unwind(payload);
        }
        results
    }

    /// Poison the run and panic on this rank.
    fn abort(&self, mut st: MutexGuard<'_, Round>, msg: String) -> ! {
        let msg = KError::CollectiveMismatch(msg).to_string();
        if st.poisoned.is_none() {
            st.poisoned = Some(msg.clone());
            st.culprit = Some(self.rank);
        }
        self.shared.cvar.notify_all();
        drop(st);
        panic!("{msg}");
    }

    fn check_health<'g>(&self, st: MutexGuard<'g, Round>, op: &str) -> MutexGuard<'g, Round> {
        if let Some(msg) = st.poisoned.clone() {
            drop(st);
            panic!("{msg}");
        }
        let missing = (0..self.shared.size).find(|&r| st.exited[r] && st.slots[r].is_none());
        if let Some(r) = missing {
            let msg = format!("rank {r} left the run while rank {} waits in `{op}`", self.rank);
            self.abort(st, msg);
        }
        st
    }

    /// Deposit `data`, wait for every rank, and return all contributions in
    /// rank order.
    fn collective(&self, op: &'static str, data: Vec<f64>) -> Arc<Vec<Vec<f64>>> {
        let sh = &*self.shared;
        let mut st = self.check_health(sh.lock(), op);
        match st.op {
            None => st.op = Some((op, data.len())),
            Some((other, len)) if other != op || len != data.len() => {
                let msg = format!(
                    "rank {} issued `{op}` with {} values while other ranks issued `{other}` \
                     with {len}",
                    self.rank,
                    data.len()
                );
                self.abort(st, msg);
            }
            Some(_) => {}
        }
        st.slots[self.rank] = Some(data);
        st.arrived += 1;
        if st.arrived == sh.size {
            let all: Vec<Vec<f64>> =
                st.slots.iter_mut().map(|s| s.take().unwrap_or_default()).collect();
            st.published = Arc::new(all);
            st.arrived = 0;
            st.op = None;
            st.generation += 1;
            sh.cvar.notify_all();
            return Arc::clone(&st.published);
        }
        let my_gen = st.generation;
        loop {
            st = sh.wait(st);
            if st.generation != my_gen {
                return Arc::clone(&st.published);
            }
            st = self.check_health(st, op);
        }
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.collective("barrier", Vec::new());
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        self.collective("all_reduce_sum", vec![x]).iter().fold(0.0, |acc, c| acc + c[0])
    }

    fn all_reduce_max(&self, x: f64) -> f64 {
        self.collective("all_reduce_max", vec![x])
            .iter()
            .fold(f64::NEG_INFINITY, |acc, c| acc.max(c[0]))
    }

    fn all_reduce_sum_vec(&self, v: &mut [f64]) {
        let all = self.collective("all_reduce_sum_vec", v.to_vec());
        v.iter_mut().for_each(|e| *e = 0.0);
        for contribution in all.iter() {
            for (e, c) in v.iter_mut().zip(contribution) {
                *e += c;
            }
        }
    }

    fn exchange(&self, sends: &[(usize, Vec<f64>)], recvs: &mut [(usize, Vec<f64>)]) {
        let sh = &*self.shared;
        let mut st = self.check_health(sh.lock(), "exchange");
        for (peer, buf) in sends {
            if *peer >= sh.size {
                self.abort(st, format!("rank {} sends to nonexistent rank {peer}", self.rank));
            }
            st.mail.entry((self.rank, *peer)).or_default().push_back(buf.clone());
        }
        sh.cvar.notify_all();
        for (peer, buf) in recvs.iter_mut() {
            loop {
                let queued = st.mail.get_mut(&(*peer, self.rank)).and_then(VecDeque::pop_front);
                if let Some(msg) = queued {
                    if msg.len() != buf.len() {
                        let text = format!(
                            "rank {} expected {} values from rank {peer}, received {}",
                            self.rank,
                            buf.len(),
                            msg.len()
                        );
                        self.abort(st, text);
                    }
                    buf.copy_from_slice(&msg);
                    break;
                }
                if let Some(msg) = st.poisoned.clone() {
                    drop(st);
                    panic!("{msg}");
                }
                if *peer >= sh.size || st.exited[*peer] {
                    let text =
                        format!("rank {peer} never sent the buffer rank {} waits for", self.rank);
                    self.abort(st, text);
                }
                st = sh.wait(st);
            }
        }
    }
}
