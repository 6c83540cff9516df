//! Runtime selection, host/device transfers and the [`test_kernel!`] harness.

use std::fmt::Display;

use cubecl::{prelude::*, server::Handle};
use half::bf16;
use rand::{Rng, SeedableRng, rngs::StdRng};

#[cfg(all(
    any(test, feature = "test-utils"),
    not(any(feature = "cuda", feature = "rocm", feature = "wgpu", feature = "cpu"))
))]
pub type TestRuntime = compile_error!(
    "test-utils needs a backend feature: one of `cuda`, `rocm`, `wgpu` or `cpu`"
);

#[cfg(feature = "rocm")]
pub type TestRuntime = cubecl::hip::HipRuntime;

#[cfg(feature = "cuda")]
pub type TestRuntime = cubecl::cuda::CudaRuntime;

#[cfg(feature = "wgpu")]
pub type TestRuntime = cubecl::wgpu::WgpuRuntime;

#[cfg(feature = "cpu")]
pub type TestRuntime = cubecl::cpu::CpuRuntime;

pub type TestClient = ComputeClient<TestRuntime>;

/// Seed of every [`test_kernel!`] RNG.
pub const TEST_SEED: u64 = 42;

pub fn client() -> TestClient {
    TestRuntime::client(&<TestRuntime as cubecl::Runtime>::Device::default())
}

pub fn test_rng() -> StdRng {
    StdRng::seed_from_u64(TEST_SEED)
}

/// Initial contents of a test buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// `0, 1, 2, ...` in flat index order.
    Range,
    Fill(f64),
    /// Uniform in `[start, end)`.
    Uniform(f64, f64),
}

impl Default for Init {
    fn default() -> Self {
        Init::Uniform(-10.0, 10.0)
    }
}

impl Init {
    pub fn values<F: TestFloat>(self, rng: &mut StdRng, len: usize) -> Vec<F> {
        match self {
            Init::Range => range_vec(len),
            Init::Fill(value) => vec![F::from_f64(value); len],
            Init::Uniform(start, end) => random_vec(rng, len, start, end),
        }
    }
}

pub fn range_vec<F: TestFloat>(len: usize) -> Vec<F> {
    (0..len).map(|i| F::from_f64(i as f64)).collect()
}

pub fn random_vec<F: TestFloat>(rng: &mut StdRng, len: usize, start: f64, end: f64) -> Vec<F> {
    (0..len)
        .map(|_| F::from_f64(rng.random_range(start..end)))
        .collect()
}

pub fn upload<F: TestFloat>(client: &TestClient, data: &[F]) -> Handle {
    client.create_from_slice(F::as_bytes(data))
}

pub fn download<F: TestFloat>(client: &TestClient, handle: Handle) -> Vec<F> {
    F::from_bytes(&client.read_one(handle)).to_vec()
}

/// Row-major strides of `shape`.
pub fn get_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Contiguous device copy of a host vector.
pub struct TestBuffer {
    pub handle: Handle,
    pub shape: Vec<usize>,
    pub strides: Vec<usize>,
}

impl TestBuffer {
    pub fn upload<F: TestFloat>(client: &TestClient, data: &[F], shape: Vec<usize>) -> Self {
        assert_eq!(data.len(), shape.iter().product::<usize>(), "shape {shape:?}");
        Self {
            handle: upload(client, data),
            strides: get_strides(&shape),
            shape,
        }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn tensor_arg<F: TestFloat>(&self) -> TensorArg<'_, TestRuntime> {
        unsafe { TensorArg::from_raw_parts::<F>(&self.handle, &self.strides, &self.shape, 1) }
    }

    pub fn array_arg<F: TestFloat>(&self) -> ArrayArg<'_, TestRuntime> {
        unsafe { ArrayArg::from_raw_parts::<F>(&self.handle, self.len(), 1) }
    }

    /// Downloads the buffer and compares it against `expected`.
    pub fn assert_matches<F: TestFloat>(&self, client: &TestClient, expected: &[F], name: &str) {
        let actual = download::<F>(client, self.handle.clone());
        slices_eq(&actual, expected, name);
    }
}

/// Defines kernel tests that launch once and compare every buffer against a
/// host-side reference.
///
/// ```ignore
/// test_kernel! {
///     #[test]
///     fn adds_rows() for F in [f32] {
///         let a: Array = [16] as Uniform(-1.0, 1.0);
///         let out: Tensor = [4, 4] as Fill(0.0);
///
///         assert_eq!(
///             add_kernel(a(), out(), lit(2)) for (1, 1, 1) @ (16),
///             { /* mutate `out` (a `Vec<F>`) into the expected result */ }
///         );
///     }
/// }
/// ```
///
/// - The float list is `[f32]` or `[path::to::Type | suffix]`; the test name
///   gets `_suffix` appended and `F` aliases the type inside the body.
/// - `Array` and `Tensor` buffers are passed with line size 1. The
///   initializer is an [`Init`] variant and defaults to `Uniform(-10, 10)`.
/// - `name()` passes a buffer, `lit(expr)` passes `expr` as is.
/// - Launch is `for (x, y, z)` cubes of `@ (units)` units each.
/// - Every buffer is checked after the launch, inputs included, so a kernel
///   that writes past its output is caught.
#[macro_export]
macro_rules! test_kernel {
    { @init } => { <$crate::test_utils::Init as ::core::default::Default>::default() };
    { @init as $variant:ident $(($($param:expr),+))? } => {
        $crate::test_utils::Init::$variant $(($($param),+))?
    };

    { @kind($t:ty) Array $buffer:expr } => { $buffer.array_arg::<$t>() };
    { @kind($t:ty) Tensor $buffer:expr } => { $buffer.tensor_arg::<$t>() };

    { @arg($buffer_arg:ident) $_name:ident() } => { $buffer_arg };
    { @arg($buffer_arg:ident) lit($value:expr) } => { $value };

    {
        @fn [$tid:ident];
        $(#[$attr:meta])* $name:ident($($args:tt)*) $tname:ident; $body:block
    } => {
        $crate::test_kernel! { @fn [$tid | $tid]; $(#[$attr])* $name($($args)*) $tname; $body }
    };
    {
        @fn [$t:ty | $tid:ident];
        $(#[$attr:meta])* $name:ident($($args:tt)*) $tname:ident; $body:block
    } => {
        ::paste::paste! {
            $(#[$attr])*
            fn [<$name _ $tid>]($($args)*) {
                #[allow(dead_code)]
                type $tname = $t;
                $body
            }
        }
    };

    {
    $(
        $(#[$attr:meta])*
        fn $name:ident($($args:tt)*) for $tname:ident in [$($ty:tt)+] {
            $(
            let $var:ident: $kind:ident = [$($dim:expr),*]
                $(as $init:ident $(($($param:expr),+))?)?;
            )*

            assert_eq!(
                $kernel:ident($($arg:ident($($value:expr)?)),*)
                    for ($($count:expr),*) @ ($units:expr),
                $reference:expr $(,)?
            );
        }
    )*
    } => {
    $(
        $crate::test_kernel! {
            @fn [$($ty)+]; $(#[$attr])* $name($($args)*) $tname;
            {
                let client = $crate::test_utils::client();
                #[allow(unused_mut, unused_variables)]
                let mut rng = $crate::test_utils::test_rng();

                ::paste::paste! {
                    $(
                    let shape = ::std::vec![$($dim),*];
                    let init = $crate::test_kernel!(@init $(as $init $(($($param),+))?)?);
                    #[allow(unused_mut)]
                    let mut $var: Vec<$tname> = init.values(&mut rng, shape.iter().product());
                    let [<$var _buffer>] =
                        $crate::test_utils::TestBuffer::upload(&client, &$var, shape);
                    let [<$var _arg>] =
                        $crate::test_kernel!(@kind($tname) $kind [<$var _buffer>]);
                    )*

                    $kernel::launch::<$tname, $crate::test_utils::TestRuntime>(
                        &client,
                        ::cubecl::prelude::CubeCount::Static($(($count) as u32),*),
                        ::cubecl::prelude::CubeDim::new_1d(($units) as u32),
                        $($crate::test_kernel!(@arg([<$arg _arg>]) $arg($($value)?))),*
                    )
                    .expect("Kernel launch failed");

                    $reference;

                    $(
                    [<$var _buffer>].assert_matches(&client, &$var, stringify!($var));
                    )*
                }
            }
        }
    )*
    };
}

/// Whether `actual` is within the type's tolerance of `expected`.
pub fn approx_eq<F: TestFloat>(actual: F, expected: F) -> bool {
    let (a, e) = (actual.into_f64(), expected.into_f64());
    (a - e).abs() <= F::atol() + F::rtol() * e.abs()
}

/// Asserts element-wise closeness, listing the first mismatches.
pub fn slices_eq<F: TestFloat>(actual: &[F], expected: &[F], ctx: &str) {
    assert_eq!(actual.len(), expected.len(), "{ctx}: length mismatch");

    let mismatches: Vec<_> = actual
        .iter()
        .zip(expected)
        .enumerate()
        .filter(|(_, (a, e))| !approx_eq(**a, **e))
        .collect();
    for (i, (a, e)) in mismatches.iter().take(16) {
        eprintln!("{ctx}[{i}]: expected {e}, got {a}");
    }
    assert!(
        mismatches.is_empty(),
        "{ctx}: {} of {} elements differ",
        mismatches.len(),
        actual.len()
    );
}

pub trait TestFloat: CubeElement + CubePrimitive + Float + Copy + Display {
    fn into_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn rtol() -> f64;
    fn atol() -> f64;
}

impl TestFloat for f32 {
    fn into_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn rtol() -> f64 {
        1e-4
    }
    fn atol() -> f64 {
        1e-4
    }
}

impl TestFloat for bf16 {
    fn into_f64(self) -> f64 {
        self.to_f64()
    }
    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }
    fn rtol() -> f64 {
        5e-2
    }
    fn atol() -> f64 {
        5e-2
    }
}
