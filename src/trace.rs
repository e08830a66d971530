//! Error wrapper that remembers where an error was first raised.
//!
//! In debug builds a backtrace is captured the moment an error gets wrapped.
//! The backtrace survives conversions between the error types of the
//! different layers, so a failed rank update still points at the statement
//! that failed rather than at the place where the ledger reported it.

use std::{
	backtrace::Backtrace,
	error::Error,
	fmt::{self, Debug, Display},
	ops::Deref,
	result::Result as StdResult,
};


pub type Result<T, E> = StdResult<T, Traced<E>>;

pub trait Traceable<E> {
	fn trace(self) -> Traced<E>;
}

pub struct Traced<E> {
	inner: E,
	#[cfg(debug_assertions)]
	backtrace: Backtrace,
}


/// Shorthand for returning a freshly traced error.
pub fn err<T, E>(inner: E) -> Result<T, E> { Err(Traced::new(inner)) }


impl<E> Traceable<E> for E {
	fn trace(self) -> Traced<E> { Traced::new(self) }
}

impl<E> Traced<E> {
	pub fn new(inner: E) -> Self {
		Self {
			inner,
			#[cfg(debug_assertions)]
			backtrace: Backtrace::force_capture(),
		}
	}

	#[cfg(debug_assertions)]
	pub fn backtrace(&self) -> Option<&Backtrace> { Some(&self.backtrace) }

	#[cfg(not(debug_assertions))]
	pub fn backtrace(&self) -> Option<&Backtrace> { None }

	pub fn inner(&self) -> &E { &self.inner }

	pub fn into_inner(self) -> E { self.inner }

	/// Converts the wrapped error, keeping the original backtrace.
	pub fn map<F, O>(self, f: F) -> Traced<O>
	where
		F: FnOnce(E) -> O,
	{
		Traced {
			inner: f(self.inner),
			#[cfg(debug_assertions)]
			backtrace: self.backtrace,
		}
	}
}

impl<E> From<E> for Traced<E> {
	fn from(other: E) -> Self { Self::new(other) }
}

impl<E> Deref for Traced<E> {
	type Target = E;

	fn deref(&self) -> &Self::Target { &self.inner }
}

impl<E> Debug for Traced<E>
where
	E: Debug,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{:?}", &self.inner)?;
		if let Some(b) = self.backtrace() {
			write!(f, "{}", b)?;
		}
		Ok(())
	}
}

impl<E> Display for Traced<E>
where
	E: Display,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", &self.inner) }
}

impl<E> Error for Traced<E>
where
	E: Error,
{
	fn source(&self) -> Option<&(dyn Error + 'static)> { self.inner.source() }
}
