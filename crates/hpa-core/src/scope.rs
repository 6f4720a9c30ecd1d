//! Context scopes, parent relations, and placeholder shortcodes.

use crate::module::LoadModuleId;

/// A function identifier, uniqued in [`crate::Pipeline`]'s function registry.
pub type FunctionId = u32;
/// A source file identifier, uniqued in [`crate::Pipeline`]'s file registry.
pub type FileId = u32;

/// The semantic meaning of a [`crate::context::Context`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The unique CCT root.
    Global,
    /// An address whose meaning could not be resolved.
    Unknown,
    /// A raw `(load module, offset)` program-counter address.
    Point {
        /// Load module containing the address.
        module: LoadModuleId,
        /// Byte offset within the module.
        offset: u64,
    },
    /// A resolved function.
    Function(FunctionId),
    /// A lexical (source-level) loop inside a function.
    LexicalLoop {
        /// Enclosing function.
        function: FunctionId,
        /// Source line of the loop header.
        line: u32,
    },
    /// A binary-level loop with no recovered source line.
    BinaryLoop {
        /// Load module containing the loop.
        module: LoadModuleId,
        /// Byte offset of the loop header.
        offset: u64,
    },
    /// A resolved `(file, line)` source location.
    Line {
        /// Source file.
        file: FileId,
        /// Line number.
        line: u32,
    },
    /// A synthetic context standing in for a runtime state with no true
    /// call-path scope.
    Placeholder(Placeholder),
}

impl Scope {
    /// Discriminant ordering used as the primary key when sorting siblings
    /// during identifier assignment: scope kind first, then scope payload
    /// in canonical byte order.
    #[must_use]
    pub const fn sort_rank(&self) -> u8 {
        match self {
            Scope::Global => 0,
            Scope::Unknown => 1,
            Scope::Point { .. } => 2,
            Scope::Function(_) => 3,
            Scope::LexicalLoop { .. } => 4,
            Scope::BinaryLoop { .. } => 5,
            Scope::Line { .. } => 6,
            Scope::Placeholder(_) => 7,
        }
    }

    /// Canonical byte-comparable payload, used as the secondary sort key
    /// within a scope kind.
    #[must_use]
    pub fn sort_key(&self) -> Vec<u8> {
        match self {
            Scope::Global | Scope::Unknown => Vec::new(),
            Scope::Point { module, offset } => {
                let mut v = module.0.to_be_bytes().to_vec();
                v.extend_from_slice(&offset.to_be_bytes());
                v
            }
            Scope::Function(f) => f.to_be_bytes().to_vec(),
            Scope::LexicalLoop { function, line } => {
                let mut v = function.to_be_bytes().to_vec();
                v.extend_from_slice(&line.to_be_bytes());
                v
            }
            Scope::BinaryLoop { module, offset } => {
                let mut v = module.0.to_be_bytes().to_vec();
                v.extend_from_slice(&offset.to_be_bytes());
                v
            }
            Scope::Line { file, line } => {
                let mut v = file.to_be_bytes().to_vec();
                v.extend_from_slice(&line.to_be_bytes());
                v
            }
            Scope::Placeholder(p) => p.shortcode().to_vec(),
        }
    }

    /// Whether this scope denotes a loop (lexical or binary), used by the
    /// `lex_aware` scope-propagation rule.
    #[must_use]
    pub const fn is_loop(&self) -> bool {
        matches!(self, Scope::LexicalLoop { .. } | Scope::BinaryLoop { .. })
    }

    /// Encodes this scope as a `(kind, 12-byte payload)` pair for the
    /// sparse database's context records. The payload is left-padded with
    /// zero bytes for kinds whose natural payload is shorter than 12 bytes.
    #[must_use]
    pub fn encode(&self) -> (u8, [u8; 12]) {
        let mut payload = [0u8; 12];
        match self {
            Scope::Global | Scope::Unknown => {}
            Scope::Point { module, offset } | Scope::BinaryLoop { module, offset } => {
                payload[0..4].copy_from_slice(&module.0.to_be_bytes());
                payload[4..12].copy_from_slice(&offset.to_be_bytes());
            }
            Scope::Function(f) => payload[0..4].copy_from_slice(&f.to_be_bytes()),
            Scope::LexicalLoop { function, line } => {
                payload[0..4].copy_from_slice(&function.to_be_bytes());
                payload[4..8].copy_from_slice(&line.to_be_bytes());
            }
            Scope::Line { file, line } => {
                payload[0..4].copy_from_slice(&file.to_be_bytes());
                payload[4..8].copy_from_slice(&line.to_be_bytes());
            }
            Scope::Placeholder(p) => payload[0..8].copy_from_slice(p.shortcode()),
        }
        (self.sort_rank(), payload)
    }

    /// Reverses [`Self::encode`].
    #[must_use]
    pub fn decode(kind: u8, payload: [u8; 12]) -> Option<Self> {
        Some(match kind {
            0 => Scope::Global,
            1 => Scope::Unknown,
            2 => Scope::Point {
                module: LoadModuleId(u32::from_be_bytes(payload[0..4].try_into().ok()?)),
                offset: u64::from_be_bytes(payload[4..12].try_into().ok()?),
            },
            3 => Scope::Function(u32::from_be_bytes(payload[0..4].try_into().ok()?)),
            4 => Scope::LexicalLoop {
                function: u32::from_be_bytes(payload[0..4].try_into().ok()?),
                line: u32::from_be_bytes(payload[4..8].try_into().ok()?),
            },
            5 => Scope::BinaryLoop {
                module: LoadModuleId(u32::from_be_bytes(payload[0..4].try_into().ok()?)),
                offset: u64::from_be_bytes(payload[4..12].try_into().ok()?),
            },
            6 => Scope::Line {
                file: u32::from_be_bytes(payload[0..4].try_into().ok()?),
                line: u32::from_be_bytes(payload[4..8].try_into().ok()?),
            },
            7 => {
                let shortcode: [u8; 8] = payload[0..8].try_into().ok()?;
                Scope::Placeholder(Placeholder::from_shortcode(&shortcode)?)
            }
            _ => return None,
        })
    }
}

/// How a [`crate::context::Context`] relates to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Same logical call frame, just a more specific scope (e.g. a line
    /// inside a function).
    Subscope,
    /// A genuine call: crossing this edge stops `function`-scope
    /// propagation.
    Call,
    /// An inlined call: also a call edge for scope-propagation purposes.
    InlinedCall,
    /// A lexical nesting relation that is not a call (e.g. loop body).
    EnclosingLexical,
}

impl Relation {
    /// Whether this relation is a call edge (`call` or `inlined_call`),
    /// per the `function`-scope propagation rule.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self, Relation::Call | Relation::InlinedCall)
    }
}

/// Synthetic scopes used when the true call-path scope is unknown or
/// represents a non-call runtime state.
///
/// Shortcodes are pinned, 8-byte ASCII values from the originating
/// measurement format and participate in [`Scope`] equality verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// An address that could not be normalized.
    UnnormalizedIp,
    /// The primary root of a partial unwind.
    RootPrimary,
    /// The secondary root of a partial unwind.
    RootPartial,
    /// The synthetic "main thread" fence.
    FenceMain,
    /// The synthetic "other thread" fence.
    FenceThread,
    /// No activity recorded at the sample instant.
    NoActivity,
    /// OpenMP idle.
    OmpIdle,
    /// OpenMP overhead.
    OmpOverhead,
    /// OpenMP barrier wait.
    OmpBarrierWait,
    /// OpenMP task wait.
    OmpTaskWait,
    /// OpenMP mutex wait.
    OmpMutexWait,
    /// OpenMP work.
    OmpWork,
    /// OpenMP explicit task.
    OmpExplicitTask,
    /// OpenMP implicit task.
    OmpImplicitTask,
    /// OpenMP target: allocate.
    OmpTargetAlloc,
    /// OpenMP target: delete.
    OmpTargetDelete,
    /// OpenMP target: copy in.
    OmpTargetCopyIn,
    /// OpenMP target: copy out.
    OmpTargetCopyOut,
    /// OpenMP target: kernel.
    OmpTargetKernel,
    /// OpenMP target: none.
    OmpTargetNone,
    /// OpenMP target: unresolved.
    OmpTargetUnresolved,
    /// GPU copy, direction unknown.
    GpuCopy,
    /// GPU host-to-device copy.
    GpuCopyH2D,
    /// GPU device-to-host copy.
    GpuCopyD2H,
    /// GPU allocation.
    GpuAlloc,
    /// GPU deallocation.
    GpuDelete,
    /// GPU kernel execution.
    GpuKernel,
    /// GPU memset.
    GpuMemset,
    /// GPU stream sync.
    GpuSync,
    /// GPU trace marker.
    GpuTrace,
}

impl Placeholder {
    /// The pinned 8-byte ASCII shortcode, used verbatim as the byte payload
    /// of `Scope::Placeholder` at `(module=0, offset=shortcode-as-u64)`.
    #[must_use]
    pub const fn shortcode(self) -> &'static [u8; 8] {
        match self {
            Placeholder::UnnormalizedIp => b"*Unnorm ",
            Placeholder::RootPrimary => b"^Primary",
            Placeholder::RootPartial => b"^Partial",
            Placeholder::FenceMain => b"| Main  ",
            Placeholder::FenceThread => b"| Thread",
            Placeholder::NoActivity => b"NoActvty",
            Placeholder::OmpIdle => b"OMP Idle",
            Placeholder::OmpOverhead => b"OMPOvrHd",
            Placeholder::OmpBarrierWait => b"OMPBarrW",
            Placeholder::OmpTaskWait => b"OMPTaskW",
            Placeholder::OmpMutexWait => b"OMPMtexW",
            Placeholder::OmpWork => b"OMP Work",
            Placeholder::OmpExplicitTask => b"OMPETask",
            Placeholder::OmpImplicitTask => b"OMPITask",
            Placeholder::OmpTargetAlloc => b"OMTAlloc",
            Placeholder::OmpTargetDelete => b"OMTDelte",
            Placeholder::OmpTargetCopyIn => b"OMTCpIn ",
            Placeholder::OmpTargetCopyOut => b"OMTCpOut",
            Placeholder::OmpTargetKernel => b"OMTKernl",
            Placeholder::OmpTargetNone => b"OMT None",
            Placeholder::OmpTargetUnresolved => b"OMPUresv",
            Placeholder::GpuCopy => b"GPUCp?2?",
            Placeholder::GpuCopyH2D => b"GPUCpH2D",
            Placeholder::GpuCopyD2H => b"GPUCpD2H",
            Placeholder::GpuAlloc => b"GPUAlloc",
            Placeholder::GpuDelete => b"GPUDelte",
            Placeholder::GpuKernel => b"GPUKernl",
            Placeholder::GpuMemset => b"GPUMemst",
            Placeholder::GpuSync => b"GPU Sync",
            Placeholder::GpuTrace => b"GPUTrace",
        }
    }

    /// Reverses [`Self::shortcode`], used by the database reader to
    /// reconstruct a `Scope::Placeholder` from its stored 8-byte payload.
    #[must_use]
    pub fn from_shortcode(code: &[u8; 8]) -> Option<Self> {
        const ALL: [Placeholder; 30] = [
            Placeholder::UnnormalizedIp,
            Placeholder::RootPrimary,
            Placeholder::RootPartial,
            Placeholder::FenceMain,
            Placeholder::FenceThread,
            Placeholder::NoActivity,
            Placeholder::OmpIdle,
            Placeholder::OmpOverhead,
            Placeholder::OmpBarrierWait,
            Placeholder::OmpTaskWait,
            Placeholder::OmpMutexWait,
            Placeholder::OmpWork,
            Placeholder::OmpExplicitTask,
            Placeholder::OmpImplicitTask,
            Placeholder::OmpTargetAlloc,
            Placeholder::OmpTargetDelete,
            Placeholder::OmpTargetCopyIn,
            Placeholder::OmpTargetCopyOut,
            Placeholder::OmpTargetKernel,
            Placeholder::OmpTargetNone,
            Placeholder::OmpTargetUnresolved,
            Placeholder::GpuCopy,
            Placeholder::GpuCopyH2D,
            Placeholder::GpuCopyD2H,
            Placeholder::GpuAlloc,
            Placeholder::GpuDelete,
            Placeholder::GpuKernel,
            Placeholder::GpuMemset,
            Placeholder::GpuSync,
            Placeholder::GpuTrace,
        ];
        ALL.into_iter().find(|p| p.shortcode() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcodes_are_eight_bytes() {
        let all = [
            Placeholder::UnnormalizedIp,
            Placeholder::RootPrimary,
            Placeholder::RootPartial,
            Placeholder::FenceMain,
            Placeholder::FenceThread,
            Placeholder::NoActivity,
            Placeholder::OmpIdle,
            Placeholder::OmpOverhead,
            Placeholder::OmpBarrierWait,
            Placeholder::OmpTaskWait,
            Placeholder::OmpMutexWait,
            Placeholder::OmpWork,
            Placeholder::OmpExplicitTask,
            Placeholder::OmpImplicitTask,
            Placeholder::OmpTargetAlloc,
            Placeholder::OmpTargetDelete,
            Placeholder::OmpTargetCopyIn,
            Placeholder::OmpTargetCopyOut,
            Placeholder::OmpTargetKernel,
            Placeholder::OmpTargetNone,
            Placeholder::OmpTargetUnresolved,
            Placeholder::GpuCopy,
            Placeholder::GpuCopyH2D,
            Placeholder::GpuCopyD2H,
            Placeholder::GpuAlloc,
            Placeholder::GpuDelete,
            Placeholder::GpuKernel,
            Placeholder::GpuMemset,
            Placeholder::GpuSync,
            Placeholder::GpuTrace,
        ];
        for p in all {
            assert_eq!(p.shortcode().len(), 8);
        }
    }

    #[test]
    fn shortcodes_match_the_pinned_byte_values() {
        assert_eq!(Placeholder::UnnormalizedIp.shortcode(), b"*Unnorm ");
        assert_eq!(Placeholder::RootPrimary.shortcode(), b"^Primary");
        assert_eq!(Placeholder::RootPartial.shortcode(), b"^Partial");
        assert_eq!(Placeholder::FenceMain.shortcode(), b"| Main  ");
        assert_eq!(Placeholder::FenceThread.shortcode(), b"| Thread");
        assert_eq!(Placeholder::NoActivity.shortcode(), b"NoActvty");
        assert_eq!(Placeholder::OmpIdle.shortcode(), b"OMP Idle");
        assert_eq!(Placeholder::OmpOverhead.shortcode(), b"OMPOvrHd");
        assert_eq!(Placeholder::OmpBarrierWait.shortcode(), b"OMPBarrW");
        assert_eq!(Placeholder::OmpTaskWait.shortcode(), b"OMPTaskW");
        assert_eq!(Placeholder::OmpMutexWait.shortcode(), b"OMPMtexW");
        assert_eq!(Placeholder::OmpWork.shortcode(), b"OMP Work");
        assert_eq!(Placeholder::OmpExplicitTask.shortcode(), b"OMPETask");
        assert_eq!(Placeholder::OmpImplicitTask.shortcode(), b"OMPITask");
        assert_eq!(Placeholder::OmpTargetAlloc.shortcode(), b"OMTAlloc");
        assert_eq!(Placeholder::OmpTargetDelete.shortcode(), b"OMTDelte");
        assert_eq!(Placeholder::OmpTargetCopyIn.shortcode(), b"OMTCpIn ");
        assert_eq!(Placeholder::OmpTargetCopyOut.shortcode(), b"OMTCpOut");
        assert_eq!(Placeholder::OmpTargetKernel.shortcode(), b"OMTKernl");
        assert_eq!(Placeholder::OmpTargetNone.shortcode(), b"OMT None");
        assert_eq!(Placeholder::OmpTargetUnresolved.shortcode(), b"OMPUresv");
        assert_eq!(Placeholder::GpuCopy.shortcode(), b"GPUCp?2?");
        assert_eq!(Placeholder::GpuCopyH2D.shortcode(), b"GPUCpH2D");
        assert_eq!(Placeholder::GpuCopyD2H.shortcode(), b"GPUCpD2H");
        assert_eq!(Placeholder::GpuAlloc.shortcode(), b"GPUAlloc");
        assert_eq!(Placeholder::GpuDelete.shortcode(), b"GPUDelte");
        assert_eq!(Placeholder::GpuKernel.shortcode(), b"GPUKernl");
        assert_eq!(Placeholder::GpuMemset.shortcode(), b"GPUMemst");
        assert_eq!(Placeholder::GpuSync.shortcode(), b"GPU Sync");
        assert_eq!(Placeholder::GpuTrace.shortcode(), b"GPUTrace");
    }

    #[test]
    fn relation_is_call_identifies_call_edges() {
        assert!(Relation::Call.is_call());
        assert!(Relation::InlinedCall.is_call());
        assert!(!Relation::Subscope.is_call());
        assert!(!Relation::EnclosingLexical.is_call());
    }

    #[test]
    fn scope_encode_decode_round_trips() {
        let scopes = [
            Scope::Global,
            Scope::Unknown,
            Scope::Point {
                module: LoadModuleId(7),
                offset: 0x1234,
            },
            Scope::Function(42),
            Scope::LexicalLoop { function: 3, line: 10 },
            Scope::BinaryLoop {
                module: LoadModuleId(2),
                offset: 99,
            },
            Scope::Line { file: 5, line: 20 },
            Scope::Placeholder(Placeholder::GpuKernel),
        ];
        for scope in scopes {
            let (kind, payload) = scope.encode();
            assert_eq!(Scope::decode(kind, payload), Some(scope));
        }
    }

    #[test]
    fn from_shortcode_reverses_shortcode() {
        assert_eq!(
            Placeholder::from_shortcode(Placeholder::GpuKernel.shortcode()),
            Some(Placeholder::GpuKernel)
        );
        assert_eq!(Placeholder::from_shortcode(b"nonsense"), None);
    }

    #[test]
    fn sort_rank_orders_scope_kinds_before_payload() {
        assert!(Scope::Global.sort_rank() < Scope::Unknown.sort_rank());
        assert!(Scope::Unknown.sort_rank() < Scope::Function(0).sort_rank());
    }
}
