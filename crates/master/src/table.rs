//! Process/resource table.
//!
//! The authoritative state of every worker slot and every resource kind.
//! Only the scheduling loop holds it mutably; every mutator keeps the
//! capacity, exclusivity and blocked-consistency invariants or fails.

use std::fmt;

use rand::Rng;
use resmgr_core::{ResourceId, SlotId};

use crate::actors::WorkerLink;
use crate::config::MasterConfig;
use crate::error::{MasterError, Result};

/// Lifecycle state of a worker slot.
///
/// `Blocked` carries the resource the slot waits on, so a blocked slot
/// always names a resource and an unblocked one never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    NotStarted,
    Active,
    Blocked(ResourceId),
}

impl SlotState {
    #[must_use]
    pub const fn blocked_on(self) -> Option<ResourceId> {
        match self {
            Self::Blocked(res) => Some(res),
            Self::NotStarted | Self::Active => None,
        }
    }
}

/// Fixed description of a resource kind, shared read-only with workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub shareable: bool,
    pub limit: u32,
}

impl ResourceInfo {
    #[must_use]
    pub const fn new(shareable: bool, limit: u32) -> Self {
        Self { shareable, limit }
    }

    /// Draw a resource kind from the configured distribution.
    pub fn random<R: Rng + ?Sized>(config: &MasterConfig, rng: &mut R) -> Self {
        let shareable = rng.gen_range(0..100) < config.shareable_percent;
        let limit = rng.gen_range(config.limit_min..=config.limit_max);
        Self { shareable, limit }
    }
}

/// Process control block for one slot.
#[derive(Default)]
struct Pcb {
    state: SlotState,
    link: Option<WorkerLink>,
}

impl fmt::Debug for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pcb")
            .field("state", &self.state)
            .field("linked", &self.link.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct ResourceKind {
    info: ResourceInfo,
    allocated: Vec<u32>,
}

/// State of all worker slots and resource kinds.
#[derive(Debug)]
pub struct ProcessTable {
    pcbs: Vec<Pcb>,
    resources: Vec<ResourceKind>,
}

impl ProcessTable {
    /// Create a table with `slot_count` free slots and the given resource kinds.
    #[must_use]
    pub fn new(slot_count: usize, resources: Vec<ResourceInfo>) -> Self {
        let pcbs = std::iter::repeat_with(Pcb::default).take(slot_count).collect();
        let resources = resources
            .into_iter()
            .map(|info| ResourceKind {
                info,
                allocated: vec![0; slot_count],
            })
            .collect();
        Self { pcbs, resources }
    }

    /// Create a table with randomly drawn resource kinds.
    pub fn random<R: Rng + ?Sized>(config: &MasterConfig, rng: &mut R) -> Self {
        let resources = (0..config.resource_count)
            .map(|_| ResourceInfo::random(config, rng))
            .collect();
        Self::new(config.slot_count, resources)
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.pcbs.len()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Descriptors of every resource kind, in id order.
    #[must_use]
    pub fn resource_infos(&self) -> Vec<ResourceInfo> {
        self.resources.iter().map(|kind| kind.info).collect()
    }

    /// Descriptor of one resource kind.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::ResourceOutOfRange`] for an unknown id.
    pub fn resource(&self, res: ResourceId) -> Result<ResourceInfo> {
        self.kind(res).map(|kind| kind.info)
    }

    fn pcb(&self, slot: SlotId) -> Result<&Pcb> {
        self.pcbs
            .get(slot.index())
            .ok_or(MasterError::SlotOutOfRange(slot))
    }

    fn pcb_mut(&mut self, slot: SlotId) -> Result<&mut Pcb> {
        self.pcbs
            .get_mut(slot.index())
            .ok_or(MasterError::SlotOutOfRange(slot))
    }

    fn kind(&self, res: ResourceId) -> Result<&ResourceKind> {
        self.resources
            .get(res.index())
            .ok_or(MasterError::ResourceOutOfRange(res))
    }

    fn cell_mut(&mut self, slot: SlotId, res: ResourceId) -> Result<&mut u32> {
        self.resources
            .get_mut(res.index())
            .ok_or(MasterError::ResourceOutOfRange(res))?
            .allocated
            .get_mut(slot.index())
            .ok_or(MasterError::SlotOutOfRange(slot))
    }

    /// Claim the lowest free slot and mark it active.
    pub fn claim_slot(&mut self) -> Option<SlotId> {
        let index = self
            .pcbs
            .iter()
            .position(|pcb| pcb.state == SlotState::NotStarted)?;
        let pcb = self.pcbs.get_mut(index)?;
        pcb.state = SlotState::Active;
        Some(SlotId::new(index))
    }

    /// Return a slot to `NotStarted`, handing back its worker link if any.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::SlotOutOfRange`] for an unknown slot.
    pub fn free_slot(&mut self, slot: SlotId) -> Result<Option<WorkerLink>> {
        let pcb = self.pcb_mut(slot)?;
        pcb.state = SlotState::NotStarted;
        Ok(pcb.link.take())
    }

    /// Current state of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::SlotOutOfRange`] for an unknown slot.
    pub fn state(&self, slot: SlotId) -> Result<SlotState> {
        self.pcb(slot).map(|pcb| pcb.state)
    }

    /// Resource a slot waits on, if it is blocked.
    #[must_use]
    pub fn blocked_on(&self, slot: SlotId) -> Option<ResourceId> {
        self.pcb(slot).ok().and_then(|pcb| pcb.state.blocked_on())
    }

    /// Overwrite a slot's state.
    ///
    /// # Errors
    ///
    /// Returns an out-of-range error for an unknown slot or blocking resource.
    pub fn set_state(&mut self, slot: SlotId, state: SlotState) -> Result<()> {
        if let Some(res) = state.blocked_on() {
            self.kind(res)?;
        }
        self.pcb_mut(slot)?.state = state;
        Ok(())
    }

    /// Attach the channels of a launched worker to its slot.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::SlotOutOfRange`] for an unknown slot.
    pub fn attach_link(&mut self, slot: SlotId, link: WorkerLink) -> Result<()> {
        self.pcb_mut(slot)?.link = Some(link);
        Ok(())
    }

    /// Worker link of a slot.
    #[must_use]
    pub fn link(&self, slot: SlotId) -> Option<&WorkerLink> {
        self.pcb(slot).ok().and_then(|pcb| pcb.link.as_ref())
    }

    /// Mutable worker link of a slot.
    pub fn link_mut(&mut self, slot: SlotId) -> Option<&mut WorkerLink> {
        self.pcb_mut(slot).ok().and_then(|pcb| pcb.link.as_mut())
    }

    /// Units of `res` held by `slot`.
    #[must_use]
    pub fn allocated(&self, slot: SlotId, res: ResourceId) -> u32 {
        self.kind(res)
            .ok()
            .and_then(|kind| kind.allocated.get(slot.index()).copied())
            .unwrap_or(0)
    }

    /// Units of `res` held across all slots.
    #[must_use]
    pub fn total_allocated(&self, res: ResourceId) -> u32 {
        self.kind(res)
            .map(|kind| kind.allocated.iter().sum())
            .unwrap_or(0)
    }

    /// Slots holding at least one unit of `res`, in slot order.
    #[must_use]
    pub fn holders(&self, res: ResourceId) -> Vec<SlotId> {
        self.kind(res)
            .map(|kind| {
                kind.allocated
                    .iter()
                    .enumerate()
                    .filter(|(_, units)| **units > 0)
                    .map(|(index, _)| SlotId::new(index))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether one more unit of `res` can go to `slot` right now.
    ///
    /// A non-shareable resource is refused while any other slot holds it;
    /// every resource is refused once its limit is reached.
    #[must_use]
    pub fn can_grant(&self, slot: SlotId, res: ResourceId) -> bool {
        let Ok(kind) = self.kind(res) else {
            return false;
        };
        let held_by_others = kind
            .allocated
            .iter()
            .enumerate()
            .any(|(index, units)| index != slot.index() && *units > 0);
        if !kind.info.shareable && held_by_others {
            return false;
        }
        self.total_allocated(res) < kind.info.limit
    }

    /// Give one unit of `res` to `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::GrantViolation`] if the grant would exceed the
    /// limit or share a non-shareable resource. That is a caller bug.
    pub fn grant(&mut self, slot: SlotId, res: ResourceId) -> Result<()> {
        let info = self.resource(res)?;
        self.pcb(slot)?;
        if self.total_allocated(res) >= info.limit {
            return Err(MasterError::grant_violation(
                slot,
                res,
                format!("limit {} reached", info.limit),
            ));
        }
        if !info.shareable && self.holders(res).iter().any(|holder| *holder != slot) {
            return Err(MasterError::grant_violation(
                slot,
                res,
                "non-shareable resource held by another slot",
            ));
        }
        let cell = self.cell_mut(slot, res)?;
        *cell = cell.saturating_add(1);
        Ok(())
    }

    /// Take one unit of `res` back from `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::ProtocolViolation`] if the slot holds none.
    pub fn release(&mut self, slot: SlotId, res: ResourceId) -> Result<()> {
        let cell = self.cell_mut(slot, res)?;
        if *cell == 0 {
            return Err(MasterError::protocol_violation(
                slot,
                format!("released {res} without holding it"),
            ));
        }
        *cell = cell.saturating_sub(1);
        Ok(())
    }

    /// Zero every allocation of `slot`, returning what it held.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::SlotOutOfRange`] for an unknown slot.
    pub fn release_all(&mut self, slot: SlotId) -> Result<Vec<(ResourceId, u32)>> {
        self.pcb(slot)?;
        let released = self
            .resources
            .iter_mut()
            .enumerate()
            .filter_map(|(index, kind)| {
                let cell = kind.allocated.get_mut(slot.index())?;
                let units = std::mem::take(cell);
                (units > 0).then_some((ResourceId::new(index), units))
            })
            .collect();
        Ok(released)
    }

    /// Slots in the given state, in slot order.
    pub fn slots_in(&self, wanted: fn(SlotState) -> bool) -> impl Iterator<Item = SlotId> + '_ {
        self.pcbs
            .iter()
            .enumerate()
            .filter(move |(_, pcb)| wanted(pcb.state))
            .map(|(index, _)| SlotId::new(index))
    }

    /// Lowest blocked slot.
    #[must_use]
    pub fn first_blocked(&self) -> Option<SlotId> {
        self.slots_in(|state| matches!(state, SlotState::Blocked(_)))
            .next()
    }

    /// Slots that currently host a worker.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.slots_in(|state| state != SlotState::NotStarted).count()
    }

    /// First broken invariant, if any.
    #[must_use]
    pub fn invariant_violation(&self) -> Option<String> {
        for (index, kind) in self.resources.iter().enumerate() {
            let res = ResourceId::new(index);
            let total: u32 = kind.allocated.iter().sum();
            if total > kind.info.limit {
                return Some(format!("{res} holds {total} units over limit {}", kind.info.limit));
            }
            let holders = kind.allocated.iter().filter(|units| **units > 0).count();
            if !kind.info.shareable && holders > 1 {
                return Some(format!("non-shareable {res} has {holders} holders"));
            }
        }
        for (index, pcb) in self.pcbs.iter().enumerate() {
            if let SlotState::Blocked(res) = pcb.state {
                if res.index() >= self.resources.len() {
                    return Some(format!("{} blocked on unknown {res}", SlotId::new(index)));
                }
            }
        }
        None
    }

    /// Printable allocation matrix.
    #[must_use]
    pub const fn snapshot(&self) -> TableSnapshot<'_> {
        TableSnapshot(self)
    }
}

/// Allocation matrix view: one column per resource, one row per slot.
/// Blocked rows are prefixed with the awaited resource.
pub struct TableSnapshot<'a>(&'a ProcessTable);

impl fmt::Display for TableSnapshot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.0;

        write!(f, "        ")?;
        for kind in &table.resources {
            write!(f, "{:<4}", if kind.info.shareable { "s" } else { "ns" })?;
        }
        writeln!(f)?;

        write!(f, "bl      ")?;
        for index in 0..table.resources.len() {
            write!(f, "{:<4}", ResourceId::new(index).to_string())?;
        }
        writeln!(f)?;

        for (index, pcb) in table.pcbs.iter().enumerate() {
            let slot = SlotId::new(index).to_string();
            match pcb.state {
                SlotState::Blocked(res) => write!(f, "{:<4}{slot:<4}", res.index())?,
                SlotState::NotStarted | SlotState::Active => write!(f, "    {slot:<4}")?,
            }
            for kind in &table.resources {
                write!(f, "{:<4}", kind.allocated.get(index).copied().unwrap_or(0))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
