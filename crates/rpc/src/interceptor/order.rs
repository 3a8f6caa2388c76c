use crate::part::ResponsePart;

/// What to do with a response part after the interceptor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admit {
	Pass,
	/// Emit an empty `Metadata` first, then the part.
	WithMetadataFirst,
	Drop(&'static str),
}

/// Enforces response part order: one optional `Metadata` ahead of every
/// `Message`, then exactly one `End`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum ResponseOrder {
	#[default]
	AwaitingMetadata,
	Streaming,
	Ended,
}

impl ResponseOrder {
	pub(crate) fn admit<T>(&mut self, part: &ResponsePart<T>) -> Admit {
		match (*self, part) {
			(Self::Ended, _) => Admit::Drop("part after end"),
			(Self::AwaitingMetadata, ResponsePart::Metadata(_)) => {
				*self = Self::Streaming;
				Admit::Pass
			}
			(Self::AwaitingMetadata, ResponsePart::Message(..)) => {
				*self = Self::Streaming;
				Admit::WithMetadataFirst
			}
			(Self::Streaming, ResponsePart::Metadata(_)) => Admit::Drop("duplicate metadata"),
			(Self::Streaming, ResponsePart::Message(..)) => Admit::Pass,
			(_, ResponsePart::End(..)) => {
				*self = Self::Ended;
				Admit::Pass
			}
		}
	}
}
