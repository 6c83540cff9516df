use crate::{prelude::*, test_kernel};
use cubecl::prelude::*;
use test_case::test_matrix;

/// Walks each 4-row band left to right through a `TileStream`, writing every
/// handed-out tile back to where it came from.
#[cube(launch)]
fn stream_copy<F: Float>(input: &Tensor<F>, output: &mut Tensor<F>, #[comptime] depth: usize) {
    let desc = TileDesc::new(
        0,
        input.shape(1),
        input.shape(0),
        input.stride(0),
        0,
        CUBE_POS_X as usize * D4::VALUE,
    );
    let tiles = (input.shape(1) + D4::VALUE - 1) / D4::VALUE;

    let mut stream = plane::TileStream::<f32, D4, D4>::new(desc, depth);
    #[unroll]
    for _ in 0..depth {
        stream.prefetch::<F>(input);
    }

    let mut rt = Rt::<f32, D4, D4>::new();
    for t in 0..tiles {
        stream.load::<F>(input, &mut rt);
        stream.prefetch::<F>(input);
        plane::store_rt::<f32, F, D4, D4>(&rt, output, &desc.step_cols(t * D4::VALUE));
    }
}

test_kernel! {
    #[test_matrix([4, 6], [4, 22], [0, 1, 3, 8])]
    fn stream_hands_out_tiles_in_order(rows: usize, cols: usize, depth: usize) for F in [f32] {
        let input: Tensor = [rows, cols];
        let output: Tensor = [rows, cols] as Fill(0.0);

        assert_eq!(
            stream_copy(input(), output(), lit(depth)) for (rows.div_ceil(4), 1, 1) @ (1),
            {
                output.copy_from_slice(&input);
            }
        );
    }
}
