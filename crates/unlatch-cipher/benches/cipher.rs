use unlatch_cipher::{decrypt_in_place, decrypt_in_place_parallel, derive_keystream};

const KEY: &str = "f626ad1ffb5159bef3e9295df34244af";

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench]
fn bench_derive_keystream() -> unlatch_cipher::Keystream {
    derive_keystream(divan::black_box(KEY))
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_in_place(bencher: divan::Bencher, size: usize) {
    let ks = derive_keystream(KEY);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| make_data(size))
        .bench_local_values(|mut data| {
            decrypt_in_place(&mut data, divan::black_box(&ks), 12);
            data
        });
}

#[divan::bench(args = [8388608, 33554432])]
fn bench_decrypt_parallel(bencher: divan::Bencher, size: usize) {
    let ks = derive_keystream(KEY);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| make_data(size))
        .bench_local_values(|mut data| {
            decrypt_in_place_parallel(&mut data, divan::black_box(&ks), 12);
            data
        });
}

fn main() {
    divan::main();
}
